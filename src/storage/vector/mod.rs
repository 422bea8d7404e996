//! Vector backend implementations.

#[cfg(test)]
mod faulty;
mod memory;
#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub mod reply;

#[cfg(test)]
pub(crate) use faulty::FaultyVectorBackend;
pub use memory::MemoryVectorBackend;
#[cfg(feature = "redis")]
pub use redis::RedisVectorBackend;
