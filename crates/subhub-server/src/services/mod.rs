//! App-level Redis data access: auth secret lookup, app settings, and
//! object/keyspace channel value reads.

pub mod redis;
