pub mod payments_client;
