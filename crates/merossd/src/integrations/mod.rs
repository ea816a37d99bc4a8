pub mod meross;
