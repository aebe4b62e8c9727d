pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod delta;
pub mod discovery;
pub mod error;
pub mod events;
pub mod hasher;
pub mod identity;
pub mod ignore;
pub mod model;
pub mod peer;
pub mod pool;
pub mod scanner;
pub mod state_store;
pub mod sync_engine;
pub mod watcher;
pub mod wire;

pub use codec::SyncMessage;
pub use config::EngineConfig;
pub use crypto::Identity;
pub use error::{Result, SwarmError};
pub use events::{SwarmEvent, TransferDirection};
pub use identity::IdentityStore;
pub use model::{BlockSignature, DeltaInstruction, FileAction, Manifest, SyncedFile};
pub use peer::{Peer, PeerDirectory};
pub use sync_engine::{
    ConflictResolution, ConflictResolutionService, SyncEngine, VersioningService,
};
