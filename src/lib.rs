pub mod arcgis;
pub mod compliance;
pub mod config;
pub mod db;
pub mod edit;
pub mod fields;
pub mod handlers;
pub mod ingest;
pub mod media;
pub mod model;
pub mod normalize;
pub mod outbox;
pub mod realtime;
pub mod rubric;
pub mod schema;
pub mod sync;
