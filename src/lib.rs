//! FleetVault - secure data and audit core for a small fleet operator
//!
//! The crate manages operator accounts, customer records and equipment
//! inventory with field-level encryption at rest, a tamper-evident audit
//! trail, one-time restore credentials and a role-hierarchy authorization
//! model. The console/UI layer is an external collaborator: it prompts,
//! validates input shape and renders; this core owns every invariant.
//!
//! # Typical wiring
//!
//! ```rust,ignore
//! use fleetvault::{audit, auth, backup, bootstrap, config, encryption, store};
//!
//! let cfg = config::VaultConfig::load()?;
//! config::init_logging(&cfg.logging);
//!
//! let cipher = encryption::Cipher::load_or_generate(&cfg.files.key_file)?;
//! let (store, audit) = store::Store::connect(&cfg, cipher).await?;
//! bootstrap::initialize(&store).await?;
//!
//! let mut session = auth::Session::with_policy(cfg.security.clone());
//! let mut engine = backup::BackupEngine::new(&cfg)?;
//! ```

pub mod audit;
pub mod auth;
pub mod backup;
pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod encryption;
pub mod errors;
pub mod store;
