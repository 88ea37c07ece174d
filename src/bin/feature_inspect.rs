use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use poi_sync::arcgis::{ArcGisClient, FeatureQuery, FeatureService};
use poi_sync::config;
use poi_sync::schema::Schema;

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Feature service where clause
    #[arg(long = "where", default_value = "1=1")]
    where_clause: String,

    /// Number of sample features to print
    #[arg(long, default_value = "3")]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let schema = Schema::load()?;
    let client = ArcGisClient::from_config(&cfg.arcgis);

    let count = client.query_count(&args.where_clause).await?;
    println!("Service: {}", cfg.arcgis.service_url);
    println!("Features matching `{}`: {}", args.where_clause, count);

    let query = FeatureQuery::new(args.where_clause.clone()).limit(args.limit);
    let set = client.query_features(&query).await?;
    for feature in set.features {
        println!(
            "- objectid={} globalid={}",
            feature.object_id().map_or("?".into(), |v| v.to_string()),
            feature.global_id().unwrap_or("?")
        );
        for (name, value) in &feature.attributes {
            if value.is_null() {
                continue;
            }
            match schema.fields.to_local(name) {
                Some(local) => println!("    {name} ({local}) = {value}"),
                None => println!("    {name} = {value}"),
            }
        }
        if let Some(geometry) = &feature.geometry {
            println!("    geometry: x={:?} y={:?}", geometry.x, geometry.y);
        }
    }
    Ok(())
}
