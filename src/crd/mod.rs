//! Custom Resource Definitions (CRDs) for redis-operator.
//!
//! - `RedisInstance`: standalone Redis server
//! - `RedisMasterReplica`: master with asynchronous replicas
//! - `RedisSentinel`: sentinel-monitored high-availability group
//! - `RedisCluster`: sharded Redis Cluster

mod common;
mod redis_cluster;
mod redis_instance;
mod redis_master_replica;
mod redis_sentinel;

pub use common::*;
pub use redis_cluster::*;
pub use redis_instance::*;
pub use redis_master_replica::*;
pub use redis_sentinel::*;
