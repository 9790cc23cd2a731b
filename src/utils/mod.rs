pub mod archive;
pub mod command;
pub mod dump;
pub mod retry;

// Re-export commonly used types and traits
#[allow(unused_imports)]
pub use archive::{Archiver, TarArchiver};
#[allow(unused_imports)]
pub use dump::{CliDumper, DatabaseDumper};
#[allow(unused_imports)]
pub use retry::{RetryError, RetryPolicy};
