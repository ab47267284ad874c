// src/session.rs

//! A wired-up engine: store, package registry and update logger
//!
//! Opening a session subscribes the registry to package definition changes
//! and the update logger to every mutation, then builds the first registry
//! snapshot.

use crate::config::Config;
use crate::error::Result;
use crate::package::RegistryHandle;
use crate::store::Store;
use crate::store::catalog::PACKAGE_CLASS;
use crate::store::triggers::{ClassFilter, MutationKinds, Phase};
use crate::update_log::UpdateLogger;
use std::sync::Arc;
use tracing::debug;

pub struct Session {
    pub store: Store,
    pub registry: Arc<RegistryHandle>,
    pub config: Arc<Config>,
}

impl Session {
    /// Wire observers onto a store and build the initial registry
    pub fn new(mut store: Store, config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(RegistryHandle::new(Arc::clone(&config)));

        store.subscribe(
            ClassFilter::class(PACKAGE_CLASS),
            Phase::After,
            MutationKinds::ALL,
            registry.clone(),
        );
        store.subscribe(
            ClassFilter::Any,
            Phase::After,
            MutationKinds::ALL,
            Arc::new(UpdateLogger::new(Arc::clone(&registry), Arc::clone(&config))),
        );

        registry.rebuild(&store)?;
        debug!("Session ready with {} configured packages", registry.load().len());

        Ok(Self {
            store,
            registry,
            config,
        })
    }

    /// Open an existing database
    pub fn open(db_path: &str, config: Config) -> Result<Self> {
        Self::new(Store::open(db_path)?, config)
    }

    /// Session over a fresh in-memory database
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(Store::open_in_memory()?, config)
    }
}
