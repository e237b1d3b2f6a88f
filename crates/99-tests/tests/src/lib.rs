//! Multi-rank scenarios for the world runtime.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod active_messages;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod collectives;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod distributed_registry;


#[cfg(all(test, not(target_arch = "wasm32")))]
mod world_ids;
