#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline orchestrator for the property consolidation toolchain.
//!
//! Each subcommand runs one batch stage; stages communicate only
//! through the JSON documents under `--data-dir`, so any stage can be
//! re-run on its own. Run them in dependency order the first time:
//! `collect` → `geocode` → `cluster` → `build-registry` →
//! `match-brands` / `proximity` / `import-brands` → `gw-ingest` /
//! `gw-match` → `match-footprints` → `enrich-footprints` →
//! `harvest-parcels` → `consolidate` → `tenants`.

mod layout;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use layout::DataLayout;
use prop_map_brands::matcher::UnmatchedStore;
use prop_map_cluster::{AddressPoint, AddressRef, LocationIndex, build_location_index};
use prop_map_coords::{CoordinateStore, Provider, atomic_write};
use prop_map_geocoder::CancelToken;
use prop_map_geocoder::collector::{CollectedAddresses, collect_all, register_in_store};
use prop_map_registry::PropertyRegistry;
use prop_map_spatial::PolygonIndex;

#[derive(Parser)]
#[command(name = "prop_map_cli", about = "Ontario commercial property consolidation pipeline")]
struct Cli {
    /// Root of the JSON data layout.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gather geocodable addresses from all sources into the coordinate store
    Collect,
    /// Run batch geocoding for one provider against pending addresses
    Geocode {
        /// Provider: geocodio, mapbox, or here
        #[arg(long)]
        provider: Provider,
        /// Maximum addresses to attempt
        #[arg(long)]
        limit: Option<usize>,
        /// Report pending counts without calling the API
        #[arg(long)]
        dry_run: bool,
    },
    /// Report addresses where providers disagree
    Divergence {
        /// Minimum max-pairwise distance to report, meters
        #[arg(long, default_value_t = 500.0)]
        threshold_m: f64,
    },
    /// Cluster geocoded RT addresses into locations
    Cluster {
        /// Union threshold, meters
        #[arg(long, default_value_t = 50.0)]
        proximity_m: f64,
    },
    /// Bootstrap the property registry from the location index
    BuildRegistry,
    /// Address-phase brand matching
    MatchBrands,
    /// Proximity-phase brand matching for stores the address phase missed
    Proximity {
        /// Match threshold, meters
        #[arg(long, default_value_t = 150.0)]
        threshold_m: f64,
    },
    /// Merge confirmed proximity matches into the match file
    MergeProximity,
    /// Import brand stores into the registry (enrich, create, dedup)
    ImportBrands,
    /// Deduplicate parsed GW records and assign GW IDs
    GwIngest,
    /// Match GW records to the registry and apply enrichment
    GwMatch,
    /// Match properties to building footprints
    MatchFootprints,
    /// Write footprint fields and snap coordinates
    EnrichFootprints {
        /// Sanity gate for brand-POI snaps, meters
        #[arg(long, default_value_t = 500.0)]
        snap_gate_m: f64,
        /// Skip coordinate snapping, write footprint fields only
        #[arg(long)]
        no_snap: bool,
        /// Compute without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Harvest municipal parcels for registry properties
    HarvestParcels {
        /// Maximum properties to query
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Group co-located properties by parcel and enrich attributes
    Consolidate {
        /// Compute without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Discover commercial tenants around properties via Overpass
    Tenants {
        /// Search radius, meters
        #[arg(long, default_value_t = 150)]
        radius_m: u32,
        /// Maximum properties to query
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print pipeline status counts
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    let layout = DataLayout::new(&cli.data_dir);

    match cli.command {
        Commands::Collect => collect(&layout)?,
        Commands::Geocode {
            provider,
            limit,
            dry_run,
        } => geocode(&layout, provider, limit, dry_run).await?,
        Commands::Divergence { threshold_m } => divergence(&layout, threshold_m)?,
        Commands::Cluster { proximity_m } => cluster(&layout, proximity_m)?,
        Commands::BuildRegistry => build_registry(&layout)?,
        Commands::MatchBrands => match_brands(&layout)?,
        Commands::Proximity { threshold_m } => proximity(&layout, threshold_m)?,
        Commands::MergeProximity => merge_proximity(&layout)?,
        Commands::ImportBrands => import_brands(&layout)?,
        Commands::GwIngest => gw_ingest(&layout)?,
        Commands::GwMatch => gw_match(&layout)?,
        Commands::MatchFootprints => match_footprints(&layout)?,
        Commands::EnrichFootprints {
            snap_gate_m,
            no_snap,
            dry_run,
        } => enrich_footprints(&layout, snap_gate_m, !no_snap, dry_run)?,
        Commands::HarvestParcels { limit } => harvest_parcels(&layout, limit).await?,
        Commands::Consolidate { dry_run } => consolidate(&layout, dry_run)?,
        Commands::Tenants { radius_m, limit } => tenants(&layout, radius_m, limit).await?,
        Commands::Status => status(&layout)?,
    }

    Ok(())
}

/// A cancel token wired to Ctrl-C, for the long-running HTTP loops.
fn ctrl_c_token() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Cancellation requested; finishing current batch...");
            handle.cancel();
        }
    });
    token
}

fn sources(layout: &DataLayout) -> (PathBuf, PathBuf, PathBuf) {
    (
        layout.extracted_dir(),
        layout.gw_active_dir(),
        layout.brands_dir(),
    )
}

fn collect(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let (extracted, gw, brands) = sources(layout);
    let (collected, summary) =
        collect_all(Some(extracted.as_path()), Some(gw.as_path()), Some(brands.as_path()))?;

    let mut store = CoordinateStore::open(layout.coordinates())?;
    let registered = register_in_store(&mut store, &collected);

    // Brand-store coordinates double as the scraper provider.
    let mut seeded = 0;
    if layout.brands_dir().is_dir() {
        for brand_store in prop_map_brands::load_brand_stores(&layout.brands_dir())? {
            if let (Some(lat), Some(lng)) = (brand_store.lat, brand_store.lng) {
                if brand_store.address.is_empty() || brand_store.city.is_empty() {
                    continue;
                }
                if store.seed_scraper(
                    &brand_store.geocodable_address(),
                    lat,
                    lng,
                    &brand_store.brand,
                    &brand_store.scraped_at,
                ) {
                    seeded += 1;
                }
            }
        }
    }
    store.save()?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("Registered {registered} new addresses, seeded {seeded} scraper fixes");
    Ok(())
}

async fn geocode(
    layout: &DataLayout,
    provider: Provider,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = CoordinateStore::open(layout.coordinates())?;
    let cancel = ctrl_c_token();

    let summary = match provider {
        Provider::Geocodio => {
            let client = prop_map_geocoder::geocodio::GeocodioClient::from_env()?;
            prop_map_geocoder::run_geocode(&mut store, provider, &client, limit, dry_run, &cancel)
                .await?
        }
        Provider::Mapbox => {
            let client = prop_map_geocoder::mapbox::MapboxClient::from_env()?;
            prop_map_geocoder::run_geocode(&mut store, provider, &client, limit, dry_run, &cancel)
                .await?
        }
        Provider::Here => {
            let client = prop_map_geocoder::here::HereClient::from_env()?;
            prop_map_geocoder::run_geocode(&mut store, provider, &client, limit, dry_run, &cancel)
                .await?
        }
        Provider::Scraper => {
            return Err("scraper coordinates are seeded by `collect`, not geocoded".into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn divergence(layout: &DataLayout, threshold_m: f64) -> Result<(), Box<dyn std::error::Error>> {
    let store = CoordinateStore::open(layout.coordinates())?;
    let report = store.divergence_report(threshold_m);
    println!("{} addresses diverge by >= {threshold_m}m", report.len());
    for entry in &report {
        println!(
            "{:>9.1}m  {} ({} vs {})",
            entry.max_distance_m, entry.address, entry.worst_pair.0, entry.worst_pair.1
        );
    }
    Ok(())
}

/// Points + refs for the clusterer: RT-referenced addresses with best
/// coordinates, formatted by the first provider that returned one.
fn cluster_inputs(
    store: &CoordinateStore,
    collected: &CollectedAddresses,
) -> (Vec<AddressPoint>, std::collections::BTreeMap<String, Vec<AddressRef>>) {
    let mut points = Vec::new();
    let mut refs = std::collections::BTreeMap::new();

    for (address, info) in collected {
        if info.rt_refs.is_empty() {
            continue;
        }
        let Some((lat, lng)) = store.best_coords(address) else {
            continue;
        };
        let formatted = store
            .get(address)
            .and_then(|entry| {
                Provider::ALL.iter().find_map(|p| {
                    entry.get(p).and_then(|fix| fix.formatted_address.clone())
                })
            })
            .unwrap_or_else(|| address.clone());
        points.push(AddressPoint {
            address: address.clone(),
            lat,
            lng,
            formatted,
        });
        refs.insert(address.clone(), info.rt_refs.clone());
    }
    (points, refs)
}

fn cluster(layout: &DataLayout, proximity_m: f64) -> Result<(), Box<dyn std::error::Error>> {
    let (extracted, gw, brands) = sources(layout);
    let (collected, _) =
        collect_all(Some(extracted.as_path()), Some(gw.as_path()), Some(brands.as_path()))?;
    let store = CoordinateStore::open(layout.coordinates())?;

    let (points, refs) = cluster_inputs(&store, &collected);
    let built_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let index = build_location_index(&points, &refs, proximity_m, &built_at);

    let content = serde_json::to_string_pretty(&index)?;
    atomic_write(&layout.address_index(), content.as_bytes())?;
    println!("{}", serde_json::to_string_pretty(&index.stats)?);
    Ok(())
}

fn build_registry(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    if !layout.address_index().exists() {
        return Err("No address index; run cluster first".into());
    }
    let index: LocationIndex =
        serde_json::from_str(&std::fs::read_to_string(layout.address_index())?)?;
    let mut registry = PropertyRegistry::open(layout.properties())?;
    let summary = prop_map_registry::bootstrap::build_from_clusters(
        &mut registry,
        &index,
        &prop_map_registry::today(),
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn match_brands(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let registry = PropertyRegistry::open(layout.properties())?;
    let stores = prop_map_brands::load_brand_stores(&layout.brands_dir())?;
    let outcome = prop_map_brands::matcher::match_brands(&registry, &stores);

    prop_map_brands::save_match_file(&layout.brand_matches(), &outcome.matches)?;
    let unmatched = serde_json::to_string_pretty(&outcome.unmatched)?;
    atomic_write(&layout.brand_unmatched(), unmatched.as_bytes())?;

    println!(
        "Matched: {} stores -> {} properties; unmatched: {}",
        outcome.matched_stores(),
        outcome.matches.len(),
        outcome.unmatched.len()
    );
    Ok(())
}

fn proximity(layout: &DataLayout, threshold_m: f64) -> Result<(), Box<dyn std::error::Error>> {
    let registry = PropertyRegistry::open(layout.properties())?;
    let coords = CoordinateStore::open(layout.coordinates())?;
    let stores = prop_map_brands::load_brand_stores(&layout.brands_dir())?;
    let matches = prop_map_brands::load_match_file(&layout.brand_matches())?;

    let report = prop_map_brands::proximity::run_proximity(
        &registry,
        &coords,
        &stores,
        &matches,
        threshold_m,
        &layout.brand_proximity(),
    )?;
    println!("{}", serde_json::to_string_pretty(&report.stats)?);
    Ok(())
}

fn merge_proximity(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    if !layout.brand_proximity().exists() {
        return Err("No proximity report; run proximity first".into());
    }
    let report: prop_map_brands::proximity::ProximityReport =
        serde_json::from_str(&std::fs::read_to_string(layout.brand_proximity())?)?;
    let added =
        prop_map_brands::proximity::merge_proximity_matches(&layout.brand_matches(), &report)?;
    println!("Merged {added} proximity matches");
    Ok(())
}

fn import_brands(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = PropertyRegistry::open(layout.properties())?;
    let stores = prop_map_brands::load_brand_stores(&layout.brands_dir())?;
    let matches = prop_map_brands::load_match_file(&layout.brand_matches())?;
    let unmatched: Vec<UnmatchedStore> = if layout.brand_unmatched().exists() {
        serde_json::from_str(&std::fs::read_to_string(layout.brand_unmatched())?)?
    } else {
        Vec::new()
    };

    let summary = prop_map_brands::import::import_to_registry(
        &mut registry,
        &stores,
        &matches,
        &unmatched,
        &layout.brand_matches(),
        &prop_map_registry::today(),
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn gw_ingest(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let summary =
        prop_map_geowarehouse::engine::ingest(&layout.gw_parsed_dir(), &layout.gw_active_dir())?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn gw_match(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = PropertyRegistry::open(layout.properties())?;
    let records = prop_map_geowarehouse::engine::load_records(&layout.gw_active_dir())?;
    let result = prop_map_geowarehouse::matcher::match_to_registry(&records, &registry);
    let summary = prop_map_geowarehouse::matcher::apply_matches(
        &mut registry,
        &records,
        &result,
        &prop_map_registry::today(),
    )?;
    println!(
        "Matched {} / {} GW records; {}",
        result.matched.len(),
        records.len(),
        serde_json::to_string(&summary)?
    );
    Ok(())
}

fn match_footprints(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    let index = PolygonIndex::load(&layout.footprints(), prop_map_footprints::FP_ID_PROPERTY)?;
    if index.is_empty() {
        log::warn!("No footprints loaded; nothing to match");
    }
    let registry = PropertyRegistry::open(layout.properties())?;
    let matches = prop_map_footprints::matcher::match_properties(&index, &registry);
    prop_map_footprints::matcher::save_matches(&layout.footprint_matches(), &matches)?;
    println!("{}", serde_json::to_string_pretty(&matches.stats)?);
    Ok(())
}

fn enrich_footprints(
    layout: &DataLayout,
    snap_gate_m: f64,
    snap: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !layout.footprint_matches().exists() {
        return Err("No footprint matches; run match-footprints first".into());
    }
    let index = PolygonIndex::load(&layout.footprints(), prop_map_footprints::FP_ID_PROPERTY)?;
    let mut registry = PropertyRegistry::open(layout.properties())?;
    let matches = prop_map_footprints::matcher::load_matches(&layout.footprint_matches())?;

    let brand_matches = prop_map_brands::load_match_file(&layout.brand_matches())?;
    let stores = if layout.brands_dir().is_dir() {
        prop_map_brands::load_brand_stores(&layout.brands_dir())?
    } else {
        Vec::new()
    };
    let brand_poi = prop_map_footprints::enrich::build_brand_poi_coords(&brand_matches, &stores);

    let summary = prop_map_footprints::enrich::enrich_properties(
        &mut registry,
        &index,
        &matches,
        &brand_poi,
        snap,
        snap_gate_m,
        dry_run,
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn harvest_parcels(
    layout: &DataLayout,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = PropertyRegistry::open(layout.properties())?;
    let services = prop_map_parcels::services::ServiceRegistry::load(&layout.services())?;
    let mut store = prop_map_parcels::store::ParcelStore::open(layout.parcels())?;
    let client = prop_map_parcels::arcgis::ArcGisClient::default();

    let summary =
        prop_map_parcels::harvest::harvest(&registry, &services, &mut store, &client, limit).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn consolidate(layout: &DataLayout, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = PropertyRegistry::open(layout.properties())?;
    let store = prop_map_parcels::store::ParcelStore::open(layout.parcels())?;
    if store.is_empty() {
        return Err("No parcels harvested yet; run harvest-parcels first".into());
    }
    let parcel_index = PolygonIndex::from_collection(
        store.to_feature_collection()?,
        prop_map_parcels::PCL_ID_PROPERTY,
    );

    let stores = if layout.brands_dir().is_dir() {
        prop_map_brands::load_brand_stores(&layout.brands_dir())?
    } else {
        Vec::new()
    };
    let pois = prop_map_parcels::BrandPoi::from_stores(&stores);

    let footprint_index = if layout.footprints().exists() {
        Some(PolygonIndex::load(
            &layout.footprints(),
            prop_map_footprints::FP_ID_PROPERTY,
        )?)
    } else {
        None
    };

    let summary = prop_map_parcels::consolidate::consolidate(
        &mut registry,
        &parcel_index,
        &store,
        &pois,
        footprint_index.as_ref(),
        &layout.consolidation(),
        dry_run,
    )?;
    println!("{}", serde_json::to_string_pretty(&summary.stats)?);
    Ok(())
}

async fn tenants(
    layout: &DataLayout,
    radius_m: u32,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = PropertyRegistry::open(layout.properties())?;
    let mut store = prop_map_osm::store::TenantStore::open(layout.tenants())?;
    let mut client = prop_map_osm::OverpassClient::default();
    let cancel = ctrl_c_token();

    let summary = prop_map_osm::enrich::discover_tenants(
        &registry,
        &mut store,
        &mut client,
        radius_m,
        limit,
        &cancel,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn status(layout: &DataLayout) -> Result<(), Box<dyn std::error::Error>> {
    println!("Data dir: {}", layout.root().display());
    let coords = CoordinateStore::open(layout.coordinates())?;
    let stats = coords.stats();
    println!("Coordinate store: {} addresses", stats.total_addresses);
    for (provider, count) in &stats.by_provider {
        println!("  {provider}: {count}");
    }
    println!("  multi-provider: {}", stats.multi_provider);

    let registry = PropertyRegistry::open(layout.properties())?;
    println!("Registry: {} properties", registry.len());

    if layout.brand_matches().exists() {
        let matches = prop_map_brands::load_match_file(&layout.brand_matches())?;
        let total: usize = matches.values().map(Vec::len).sum();
        println!("Brand matches: {total} stores -> {} properties", matches.len());
    }
    if layout.parcels().exists() {
        let store = prop_map_parcels::store::ParcelStore::open(layout.parcels())?;
        println!(
            "Parcels: {} stored, {} properties mapped, {} no coverage",
            store.len(),
            store.property_to_parcel().len(),
            store.no_coverage().len()
        );
    }
    if layout.tenants().exists() {
        let tenants = prop_map_osm::store::TenantStore::open(layout.tenants())?;
        println!("Tenants: {} properties queried", tenants.len());
    }
    Ok(())
}
