pub mod apply;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod key;
pub mod model;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod plan;
pub mod store;
pub mod summary;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
