use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facepos_core::vision::{self, BoundingBox, FixedRegion};
use facepos_core::{Cart, Database, Embedding, EnrollPolicy, NewUser, OnnxEmbedder};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facepos", about = "Face-recognition point-of-sale store")]
struct Cli {
    /// Store root (overrides FACEPOS_DATA_DIR and the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store if needed and show its counts
    Init,
    /// Enroll a user with a face
    Enroll {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        #[command(flatten)]
        face: FaceInput,
        /// Replace name/phone/email if the user already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Match a face against enrolled users
    Validate {
        #[command(flatten)]
        face: FaceInput,
    },
    /// Record an order for a user
    Order {
        #[arg(long)]
        email: String,
        /// JSON object of item name -> {name, price, count}
        #[arg(long)]
        cart: PathBuf,
    },
    /// Show a user's record
    Show {
        #[arg(long)]
        email: String,
    },
    /// Show configuration and store counts
    Status,
}

#[derive(Args)]
struct FaceInput {
    /// JSON array holding a precomputed embedding
    #[arg(long, required_unless_present = "photo", conflicts_with = "photo")]
    embedding: Option<PathBuf>,
    /// Image file or data-URL text file to embed with the configured model
    #[arg(long)]
    photo: Option<PathBuf>,
    /// Face region in the photo as x,y,width,height (default: whole photo)
    #[arg(long, value_parser = parse_bbox, requires = "photo")]
    bbox: Option<BoundingBox>,
}

fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0.0 && *h > 0.0 => Ok(BoundingBox::new(*x, *y, *w, *h)),
        [_, _, _, _] => Err("width and height must be positive".into()),
        _ => Err("expected x,y,width,height".into()),
    }
}

/// Resolve a face input to an embedding, plus the face crop as a data URL
/// when it came from a photo.
fn load_face(face: &FaceInput, config: &Config) -> Result<(Embedding, Option<String>)> {
    if let Some(path) = &face.embedding {
        let raw = read(path)?;
        let embedding: Embedding = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing embedding {}", path.display()))?;
        return Ok((embedding, None));
    }
    let Some(path) = &face.photo else {
        bail!("either --embedding or --photo is required");
    };

    let frame = vision::decode_frame(&read(path)?)
        .with_context(|| format!("decoding photo {}", path.display()))?;
    let mut detector = FixedRegion { region: face.bbox };
    let mut embedder = OnnxEmbedder::load(&config.model_path, config.vector_size)?;
    let (embedding, roi) = vision::embed_face(&mut detector, &mut embedder, &frame)?;
    Ok((embedding, Some(vision::encode_png_data_url(&roi)?)))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(?config, "configuration loaded");

    let db = Database::open(config.store_config())
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Init | Commands::Status => {
            let stats = db.stats()?;
            print_json(&json!({ "config": config, "stats": stats }))?;
        }
        Commands::Enroll {
            name,
            phone,
            email,
            face,
            overwrite,
        } => {
            let user = NewUser::new(name, phone, email)?;
            let (embedding, _) = load_face(&face, &config)?;
            let policy = if overwrite {
                EnrollPolicy::Overwrite
            } else {
                EnrollPolicy::Preserve
            };
            let record = db.enroll(&user, &embedding, policy)?;
            print_json(&json!({ "user": record }))?;
        }
        Commands::Validate { face } => {
            let (embedding, roi) = load_face(&face, &config)?;
            let validation = db.validate(&embedding)?;
            tracing::info!(score = validation.score, accepted = validation.accepted(), "validated");
            let user = match validation.user {
                Some(record) => serde_json::to_value(record)?,
                None => json!(false),
            };
            let mut out = json!({ "user": user, "score": validation.score });
            if let Some(roi) = roi {
                out["roi"] = json!(roi);
            }
            print_json(&out)?;
        }
        Commands::Order { email, cart } => {
            let raw = read(&cart)?;
            let cart: Cart = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing cart {}", cart.display()))?;
            let id = match db.record_order(&email, &cart)? {
                Some(id) => json!(id),
                None => json!("None"),
            };
            print_json(&json!({ "id": id }))?;
        }
        Commands::Show { email } => {
            let record = db.user_by_email(&email)?;
            print_json(&json!({ "user": record }))?;
        }
    }

    Ok(())
}
