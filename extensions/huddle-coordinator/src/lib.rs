//! Session coordinator implementation of the `huddle` traits.
//!
//! [`SessionCoordinator::new`] spawns the coordinator task and returns a
//! cloneable handle implementing [`huddle::session::Huddle`]; the task winds
//! down, tearing down any active session, when the last handle is dropped.
//!
//! The signaling transport, platform media surface, and external-window
//! collaborator are supplied through the trait objects in [`Args`].

pub mod activity;
mod coordinator;
pub mod devices;
mod notify_wrapper;

pub use coordinator::{Args, SessionCoordinator};
pub use devices::{DeviceInventory, DeviceManager, DeviceTestReport};
