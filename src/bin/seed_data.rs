//! Seed data script - populates the database with a demo appliance catalog
//!
//! Run with: cargo run --bin seed-data -- --admin-password <password>
//!
//! This creates:
//! - an admin user
//! - 10 appliances across 8 categories
//!
//! Existing rows are left alone, so the script can be re-run.

use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use storefront_api::{
    auth, config, db,
    entities::{product, user},
    events::{self, EventSender},
    services::{catalog::ProductInput, CatalogService},
};

#[derive(Parser)]
#[command(name = "seed-data", about = "Seed the storefront with demo data")]
struct Args {
    #[arg(long, default_value = "admin@appliancehub.com")]
    admin_email: String,

    #[arg(long)]
    admin_password: String,

    /// Only create the admin user
    #[arg(long)]
    skip_products: bool,
}

struct Appliance {
    name: &'static str,
    description: &'static str,
    price: Decimal,
    category: &'static str,
    image_url: &'static str,
    brand: &'static str,
    stock: i32,
    features: [&'static str; 5],
}

fn catalog() -> Vec<Appliance> {
    vec![
        Appliance {
            name: "Samsung Family Hub Refrigerator",
            description: "21.5 cu. ft. 4-Door French Door Refrigerator with Touch Screen. Stay connected with built-in WiFi and Family Hub touchscreen.",
            price: dec!(2499.99),
            category: "Refrigerators",
            image_url: "https://images.unsplash.com/photo-1571175443880-49e1d25b2bc5?w=800",
            brand: "Samsung",
            stock: 15,
            features: [
                "21.5 cu. ft. capacity",
                "Built-in WiFi and touchscreen",
                "FlexZone drawer with adjustable temperature",
                "Energy Star certified",
                "French door design",
            ],
        },
        Appliance {
            name: "LG ThinQ Front Load Washer",
            description: "4.5 cu. ft. Ultra Large Capacity Smart Front Load Washer with AI DD and TurboDrum technology for superior cleaning.",
            price: dec!(1299.99),
            category: "Washing Machines",
            image_url: "https://images.unsplash.com/photo-1626806787461-102c1bfaaea1?w=800",
            brand: "LG",
            stock: 20,
            features: [
                "4.5 cu. ft. capacity",
                "AI Direct Drive technology",
                "TurboWash 360",
                "SmartThinQ app compatible",
                "Steam cleaning",
            ],
        },
        Appliance {
            name: "Whirlpool Smart Dishwasher",
            description: "Built-in dishwasher with sensor cycle and fingerprint-resistant stainless steel. Voice control enabled.",
            price: dec!(849.99),
            category: "Dishwashers",
            image_url: "https://images.unsplash.com/photo-1585659722983-3a675dabf23d?w=800",
            brand: "Whirlpool",
            stock: 18,
            features: [
                "Sensor cycle with soil sensor",
                "Voice control compatible",
                "Fingerprint-resistant finish",
                "Adjustable upper rack",
                "Energy efficient",
            ],
        },
        Appliance {
            name: "Daikin Split Air Conditioner",
            description: "18,000 BTU Ductless Mini Split Air Conditioner with Heat Pump. Whisper-quiet operation with smart control.",
            price: dec!(1899.99),
            category: "Air Conditioners",
            image_url: "https://images.unsplash.com/photo-1631545804641-2b0e18f3c28d?w=800",
            brand: "Daikin",
            stock: 12,
            features: [
                "18,000 BTU cooling capacity",
                "Heating and cooling modes",
                "WiFi enabled smart control",
                "Ultra-quiet operation",
                "Energy Star certified",
            ],
        },
        Appliance {
            name: "Panasonic Inverter Microwave",
            description: "1.2 cu. ft. Countertop Microwave with Inverter Technology for even cooking and defrosting.",
            price: dec!(249.99),
            category: "Microwaves",
            image_url: "https://images.unsplash.com/photo-1585659722983-3a675dabf23d?w=800",
            brand: "Panasonic",
            stock: 25,
            features: [
                "1.2 cu. ft. capacity",
                "Inverter technology",
                "Turbo defrost",
                "1200W power",
                "Keep warm feature",
            ],
        },
        Appliance {
            name: "Bosch Electric Range",
            description: "30-inch electric slide-in range with smooth-top ceramic glass surface and True European Convection.",
            price: dec!(1599.99),
            category: "Ranges",
            image_url: "https://images.unsplash.com/photo-1556911220-bff31c812dba?w=800",
            brand: "Bosch",
            stock: 10,
            features: [
                "30-inch width",
                "True European Convection",
                "Self-cleaning oven",
                "Ceramic glass cooktop",
                "Storage drawer",
            ],
        },
        Appliance {
            name: "GE Profile Smart Oven",
            description: "30-inch built-in double wall oven with WiFi connectivity and voice control. Convection cooking.",
            price: dec!(2899.99),
            category: "Ovens",
            image_url: "https://images.unsplash.com/photo-1556911220-e15b29be8c8f?w=800",
            brand: "GE",
            stock: 8,
            features: [
                "Double wall oven",
                "WiFi connectivity",
                "Voice control enabled",
                "True European Convection",
                "Self-cleaning with steam",
            ],
        },
        Appliance {
            name: "Frigidaire Side-by-Side Refrigerator",
            description: "25.5 cu. ft. side-by-side refrigerator with external water and ice dispenser. Store-More shelves.",
            price: dec!(1899.99),
            category: "Refrigerators",
            image_url: "https://images.unsplash.com/photo-1571175443880-49e1d25b2bc5?w=800",
            brand: "Frigidaire",
            stock: 14,
            features: [
                "25.5 cu. ft. capacity",
                "External water dispenser",
                "Ice maker included",
                "Store-More shelves",
                "LED lighting",
            ],
        },
        Appliance {
            name: "Maytag Top Load Washer",
            description: "5.3 cu. ft. high-efficiency top load washer with PowerWash agitator for tough stain removal.",
            price: dec!(799.99),
            category: "Washing Machines",
            image_url: "https://images.unsplash.com/photo-1626806787461-102c1bfaaea1?w=800",
            brand: "Maytag",
            stock: 22,
            features: [
                "5.3 cu. ft. capacity",
                "PowerWash agitator",
                "Deep water wash option",
                "Quick wash cycle",
                "Auto load sensing",
            ],
        },
        Appliance {
            name: "KitchenAid Dishwasher with PrintShield",
            description: "44 dBA dishwasher with dynamic wash arms and ProWash cycle. FreeFlex third rack included.",
            price: dec!(1199.99),
            category: "Dishwashers",
            image_url: "https://images.unsplash.com/photo-1585659722983-3a675dabf23d?w=800",
            brand: "KitchenAid",
            stock: 16,
            features: [
                "44 dBA quiet operation",
                "ProWash cycle",
                "FreeFlex third rack",
                "Dynamic wash arms",
                "PrintShield finish",
            ],
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("=== Storefront Seed Data ===");
    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&pool).await?;
    let db = Arc::new(pool);

    seed_admin(&db, &args.admin_email, &args.admin_password).await?;

    if args.skip_products {
        info!("Skipping products");
    } else {
        let existing = product::Entity::find().count(&*db).await?;
        if existing > 0 {
            info!(existing, "Catalog already has products; leaving it alone");
        } else {
            let (tx, rx) = mpsc::channel(64);
            let worker = tokio::spawn(events::process_events(rx));
            let catalog_service = CatalogService::new(db.clone(), Arc::new(EventSender::new(tx)));

            let appliances = catalog();
            let count = appliances.len();
            for appliance in appliances {
                catalog_service
                    .create_product(ProductInput {
                        name: appliance.name.to_string(),
                        description: appliance.description.to_string(),
                        price: appliance.price,
                        category: appliance.category.to_string(),
                        image_url: appliance.image_url.to_string(),
                        brand: Some(appliance.brand.to_string()),
                        stock: appliance.stock,
                        features: appliance.features.iter().map(|f| f.to_string()).collect(),
                    })
                    .await?;
            }
            drop(catalog_service);
            worker.await?;
            info!("  Created {} products", count);
        }
    }

    info!("=== Seed Data Complete ===");
    info!("Try: curl http://localhost:{}/api/v1/products", cfg.port);
    Ok(())
}

async fn seed_admin(db: &db::DbPool, email: &str, password: &str) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    if let Some(existing) = user::Entity::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(db)
        .await?
    {
        info!(user_id = %existing.id, "Admin user already exists");
        return Ok(());
    }

    let admin = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Admin User".to_string()),
        email: Set(email.clone()),
        password_hash: Set(auth::hash_password(password)?),
        is_admin: Set(true),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    info!(user_id = %admin.id, "Created admin user {}", email);
    Ok(())
}
