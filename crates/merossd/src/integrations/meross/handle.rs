use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use super::mode::DeviceMode;
use super::protocol::NS_MODE;
use super::protocol::NS_STATUS;
use super::protocol::NS_TEMPERATURE;
use super::protocol::NS_TOGGLEX;
use super::protocol::ValveStatus;
use super::protocol::encode_tenths;
use super::transport::CloudTransport;
use super::transport::Method;
use super::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed status payload: {0}")]
    Status(#[from] serde_json::Error),
}

/// Handle to one physical valve subdevice behind the cloud transport.
///
/// The transport is jointly owned: every handle of the same hub shares it,
/// and the integration's push task polls it concurrently.
pub struct ValveHandle<C> {
    transport: Arc<Mutex<C>>,
    uuid: String,
    subdevice_id: String,
}

impl<C: CloudTransport> ValveHandle<C> {
    pub fn new(transport: Arc<Mutex<C>>, uuid: String, subdevice_id: String) -> Self {
        Self {
            transport,
            uuid,
            subdevice_id,
        }
    }

    pub fn subdevice_id(&self) -> &str {
        &self.subdevice_id
    }

    async fn request(
        &self,
        namespace: &str,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let mut transport = self.transport.lock().await;
        transport
            .request(&self.uuid, namespace, method, payload)
            .await
    }

    /// Query the full status snapshot of this subdevice
    pub async fn get_status(&self) -> Result<ValveStatus, HandleError> {
        let payload = json!({ "id": self.subdevice_id });
        let response = self.request(NS_STATUS, Method::Get, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Power the valve on.
    ///
    /// Resolves once the cloud acknowledges the toggle; the caller decides
    /// what to do with a late or failed acknowledgement.
    pub async fn turn_on(&self) -> Result<(), TransportError> {
        self.set_onoff(1).await
    }

    /// Power the valve off
    pub async fn turn_off(&self) -> Result<(), TransportError> {
        self.set_onoff(0).await
    }

    async fn set_onoff(&self, onoff: u8) -> Result<(), TransportError> {
        let payload = json!({ "id": self.subdevice_id, "onoff": onoff });
        self.request(NS_TOGGLEX, Method::Set, payload).await?;
        Ok(())
    }

    /// Write the vendor operating mode
    pub async fn set_mode(&self, mode: DeviceMode) -> Result<(), TransportError> {
        let payload = json!({ "id": self.subdevice_id, "state": mode.raw() });
        self.request(NS_MODE, Method::Set, payload).await?;
        Ok(())
    }

    /// Write the target temperature, degrees Celsius.
    ///
    /// The requested value is forwarded as-is; the device clamps it to its
    /// own supported range.
    pub async fn set_target_temperature(&self, celsius: f64) -> Result<(), TransportError> {
        let payload = json!({ "id": self.subdevice_id, "currentSet": encode_tenths(celsius) });
        self.request(NS_TEMPERATURE, Method::Set, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::meross::mode::DeviceMode;
    use crate::integrations::meross::mode::ThermostatV3Mode;
    use crate::integrations::meross::transport::MockTransport;

    fn handle(transport: &Arc<Mutex<MockTransport>>) -> ValveHandle<MockTransport> {
        ValveHandle::new(
            transport.clone(),
            "1812019999".to_string(),
            "0000111122".to_string(),
        )
    }

    #[tokio::test]
    async fn test_get_status_decodes_snapshot() {
        let transport = Arc::new(Mutex::new(MockTransport::new()));
        transport.lock().await.respond(
            NS_STATUS,
            serde_json::json!({
                "togglex": { "onoff": 1 },
                "mode": { "state": 0 },
                "temperature": { "room": 180, "currentSet": 200, "heating": 1 }
            }),
        );

        let status = handle(&transport).get_status().await.unwrap();
        assert_eq!(status.togglex.onoff, 1);
        assert_eq!(status.temperature.room, 180);

        let guard = transport.lock().await;
        let requests = guard.requests_on(NS_STATUS);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].payload["id"], "0000111122");
    }

    #[tokio::test]
    async fn test_set_target_temperature_encodes_tenths() {
        let transport = Arc::new(Mutex::new(MockTransport::new()));
        handle(&transport)
            .set_target_temperature(21.5)
            .await
            .unwrap();

        let guard = transport.lock().await;
        let requests = guard.requests_on(NS_TEMPERATURE);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Set);
        assert_eq!(requests[0].payload["currentSet"], 215);
    }

    #[tokio::test]
    async fn test_set_mode_sends_raw_value() {
        let transport = Arc::new(Mutex::new(MockTransport::new()));
        handle(&transport)
            .set_mode(DeviceMode::V3(ThermostatV3Mode::Auto))
            .await
            .unwrap();

        let guard = transport.lock().await;
        let requests = guard.requests_on(NS_MODE);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload["state"], 3);
    }
}
