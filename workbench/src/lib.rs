//! A module framework core for analytics workbenches.
//!
//! This crate provides the plumbing that lets independently written analysis
//! modules live side by side in a single workbench: it owns their lifecycle,
//! lets them exchange data and mirror each other's settings, and shares a
//! session of loaded ensembles between them. Rendering is left to the host.
//!
//! # Overview
//!
//! The central object is the [`Workbench`](workbench::Workbench), built from a
//! [`ModuleRegistry`](module::ModuleRegistry) of [`Module`](module::Module)
//! definitions. Each module definition carries a default state, a set of
//! output channel and input receiver definitions, and the keys of the
//! settings its instances may synchronize.
//!
//! From a module definition the workbench creates any number of
//! [`ModuleInstance`](module::ModuleInstance)s. An instance goes through a
//! monotonic import lifecycle (`NotImported`, `Importing`, then `Imported` or
//! `Failed`); once imported, its view and settings components are available
//! together with a [`ModuleContext`](module::ModuleContext) holding the
//! instance state.
//!
//! All state changes are published through typed topics of a
//! [`PublishSubscribeDelegate`](pubsub::PublishSubscribeDelegate). A
//! subscriber is immediately handed the latest value of a topic when it
//! subscribes, and then every subsequent value. Subscribers are never invoked
//! while an internal lock is held.
//!
//! # Data channels
//!
//! Instances exchange data through [`Channel`](channel::Channel)s, registered
//! with the workbench [`Broadcaster`](channel::Broadcaster), and
//! [`ChannelReceiver`](channel::ChannelReceiver)s. A receiver only binds to a
//! channel whose key kind it accepts, and falls back to the unbound state
//! when the channel disappears.
//!
//! # Synced settings and session
//!
//! Instances may opt into synchronizing settings such as the selected
//! ensemble or date. Values published by one instance are delivered to every
//! other instance that synchronizes the same key, optionally debounced. The
//! [`WorkbenchSession`](session::WorkbenchSession) holds the loaded
//! [`EnsembleSet`](session::EnsembleSet) and the realization filters applied
//! to it.
//!
//! # Queries
//!
//! Asynchronous data fetching goes through a [`QueryCache`](query::QueryCache),
//! which deduplicates concurrent fetches of a key, and through
//! [`ScopedQueryController`](query::ScopedQueryController)s, which only await
//! the latest of their fetches.
//!
//! # Example
//!
//! ```
//! use workbench::module::{ImportState, Module, ModuleRegistry, SyncSettingKey};
//! use workbench::workbench::Workbench;
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .register(
//!         Module::new("Map", 0u32).with_sync_setting_keys([SyncSettingKey::Ensemble]),
//!     )
//!     .unwrap();
//!
//! let workbench = Workbench::new(registry);
//! let instance = workbench.make_and_add_module_instance("Map").unwrap();
//! assert_eq!(instance.import_state(), ImportState::NotImported);
//!
//! let map = workbench.typed_module_instance::<u32>(instance.id()).unwrap();
//! map.get_or_create_context().state_store().set(7);
//! assert_eq!(map.context().unwrap().state_store().get(), 7);
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events and runs the callbacks of each instance
//! within a span identifying the instance. Hosts may install any `tracing`
//! subscriber to collect them.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod channel;
pub mod config;
pub mod gui;
pub mod module;
pub mod progress;
pub mod pubsub;
pub mod query;
pub mod session;
pub mod status;
pub mod time;
pub mod workbench;

pub(crate) mod util;
