//! Script transfer: chunked upload, replace with rollback, delete with backup.

mod chunk;
mod edit;
mod error;
mod upload;

pub use chunk::chunk_code;
pub use edit::{EditPolicy, EditRequest, backup_current, delete_script, edit_script};
pub use error::{ErrorClass, TransferError};
pub use upload::{UploadPolicy, upload_script};
