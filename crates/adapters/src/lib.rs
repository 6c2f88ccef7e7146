//! Concrete collaborators for the workbench: a MySQL driver, a CSV file
//! sink and a local process launcher.

pub mod export;
pub mod mysql;
pub mod process;

pub use export::FileCsvSink;
pub use mysql::MysqlBackend;
pub use process::TokioProcessLauncher;
