/*!
 * Store Module
 *
 * Storage backends for the engine. The in-memory store is the built-in
 * backend used by tests and the administrative CLI; production callers
 * provide their own `Store` implementation.
 */

pub mod memory;

pub use memory::MemoryStore;
