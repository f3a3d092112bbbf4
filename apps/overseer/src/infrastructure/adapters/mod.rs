pub mod file_ledger;
pub mod http_transport;

pub use file_ledger::FileLedgerClient;
pub use http_transport::HttpTransport;
