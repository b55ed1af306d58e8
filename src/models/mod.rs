mod asset;
mod operation;

pub use asset::{public_url, AssetName, StoredAsset};
pub use operation::{OperationKind, SyncOperation, SyncReport};
