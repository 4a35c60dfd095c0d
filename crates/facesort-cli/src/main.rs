use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facesort", about = "Sort photos into per-person folders by face")]
struct Cli {
    /// Address of the facesortd web interface
    #[arg(long, env = "FACESORT_URL", default_value = "http://127.0.0.1:7878", global = true)]
    url: String,

    /// Print the daemon's JSON responses instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person (or add samples to them) from reference photos
    Register {
        name: String,
        /// Sample photos showing the person's face
        #[arg(required = true)]
        samples: Vec<PathBuf>,
    },
    /// Copy photos into per-person folders
    Categorize {
        /// Photos or directories of photos
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Put every photo with a face under this person instead of matching
        #[arg(short, long)]
        person: Option<String>,
    },
    /// Show the faces detected in a photo
    Detect { photo: PathBuf },
    /// List registered people
    List,
    /// Remove a registered person and their samples
    Remove { name: String },
    /// List the categorized folders
    Collections,
    /// Show daemon status
    Status,
}

struct Client {
    http: reqwest::Client,
    base: reqwest::Url,
}

impl Client {
    fn new(base: &str) -> Result<Self> {
        let base = reqwest::Url::parse(base).with_context(|| format!("invalid daemon URL {base:?}"))?;
        if base.cannot_be_a_base() {
            bail!("invalid daemon URL {base}");
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    async fn get(&self, segments: &[&str]) -> Result<Value> {
        self.send(self.http.get(self.url(segments)?)).await
    }

    async fn post(&self, segments: &[&str], body: Value) -> Result<Value> {
        self.send(self.http.post(self.url(segments)?).json(&body)).await
    }

    async fn delete(&self, segments: &[&str]) -> Result<Value> {
        self.send(self.http.delete(self.url(segments)?)).await
    }

    /// `segments` appended to the base URL, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("invalid daemon URL {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .with_context(|| format!("cannot reach facesortd at {}", self.base))?;
        let status = response.status();
        let body = response.text().await.context("failed to read response")?;
        tracing::debug!(%status, bytes = body.len(), "response received");

        let value: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).with_context(|| format!("unexpected response ({status}): {body}"))?
        };

        if !status.is_success() {
            let message = value["error"].as_str().unwrap_or(body.as_str());
            bail!("{message} ({status})");
        }
        Ok(value)
    }
}

/// Absolute paths of the photos named by `paths`; a directory stands for the
/// supported photos directly inside it.
fn expand_photo_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for path in paths {
        let path = path
            .canonicalize()
            .with_context(|| format!("cannot access {}", path.display()))?;
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(&path)
                .with_context(|| format!("cannot read {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && facesort_core::is_supported_photo(p))
                .collect();
            found.sort();
            if found.is_empty() {
                tracing::warn!(dir = %path.display(), "no supported photos in directory");
            }
            photos.extend(found);
        } else {
            photos.push(path);
        }
    }
    Ok(photos)
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))
}

fn print_registration(value: &Value) {
    let person = &value["person"];
    println!(
        "Registered {}: added {} sample(s), {} on file",
        person["name"].as_str().unwrap_or("?"),
        value["added"],
        person["samples"].as_array().map_or(0, Vec::len)
    );
    for skipped in value["skipped"].as_array().into_iter().flatten() {
        println!(
            "  skipped {}: {}",
            skipped["file_name"].as_str().unwrap_or("?"),
            skipped["reason"].as_str().unwrap_or("?")
        );
    }
}

fn print_report(value: &Value) {
    let summary = &value["summary"];
    println!(
        "{} photo(s): {} matched, {} unmatched, {} without faces, {} failed",
        summary["photos"], summary["matched"], summary["unmatched"], summary["no_faces"], summary["failed"]
    );
    for outcome in value["outcomes"].as_array().into_iter().flatten() {
        let file = outcome["file_name"].as_str().unwrap_or("?");
        let status = outcome["status"].as_str().unwrap_or("?");
        if let Some(error) = outcome["error"].as_str() {
            println!("  {file}: {status} ({error})");
            continue;
        }
        let folders: Vec<&str> = outcome["placements"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| p["folder"].as_str())
            .collect();
        println!("  {file}: {status} -> {}", folders.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url)?;

    let (value, print): (Value, fn(&Value)) = match cli.command {
        Commands::Register { name, samples } => {
            let samples = samples.iter().map(|p| canonical(p)).collect::<Result<Vec<_>>>()?;
            let value = client
                .post(&["api", "persons"], json!({ "name": name, "samples": samples }))
                .await?;
            (value, print_registration)
        }
        Commands::Categorize { paths, person } => {
            let photos = expand_photo_paths(&paths)?;
            if photos.is_empty() {
                bail!("no photos to categorize");
            }
            let value = client
                .post(&["api", "categorize"], json!({ "photos": photos, "person": person }))
                .await?;
            (value, print_report)
        }
        Commands::Detect { photo } => {
            let value = client
                .post(&["api", "detect"], json!({ "photo": canonical(&photo)? }))
                .await?;
            (value, |value: &Value| {
                let faces = value["faces"].as_array().map(Vec::as_slice).unwrap_or_default();
                println!("{}x{}: {} face(s)", value["width"], value["height"], faces.len());
                for face in faces {
                    println!(
                        "  at ({:.0}, {:.0}) size {:.0}x{:.0} confidence {:.2}",
                        face["x"].as_f64().unwrap_or_default(),
                        face["y"].as_f64().unwrap_or_default(),
                        face["width"].as_f64().unwrap_or_default(),
                        face["height"].as_f64().unwrap_or_default(),
                        face["confidence"].as_f64().unwrap_or_default()
                    );
                }
            })
        }
        Commands::List => (client.get(&["api", "persons"]).await?, |value: &Value| {
            let persons = value.as_array().map(Vec::as_slice).unwrap_or_default();
            if persons.is_empty() {
                println!("Nobody is registered");
            }
            for person in persons {
                println!(
                    "{}\t{} sample(s)",
                    person["name"].as_str().unwrap_or("?"),
                    person["samples"].as_array().map_or(0, Vec::len)
                );
            }
        }),
        Commands::Remove { name } => {
            let value = client.delete(&["api", "persons", name.as_str()]).await?;
            println!("Removed {name}");
            (value, |_: &Value| {})
        }
        Commands::Collections => (client.get(&["api", "collections"]).await?, |value: &Value| {
            for collection in value.as_array().into_iter().flatten() {
                println!(
                    "{}\t{} photo(s)",
                    collection["name"].as_str().unwrap_or("?"),
                    collection["photos"].as_array().map_or(0, Vec::len)
                );
            }
        }),
        Commands::Status => (client.get(&["api", "status"]).await?, |value: &Value| {
            println!("facesortd {}", value["version"].as_str().unwrap_or("?"));
            println!("  engine:    {}", if value["engine_running"] == true { "running" } else { "stopped" });
            println!("  persons:   {}", value["persons"]);
            println!("  threshold: {}", value["similarity_threshold"]);
            println!("  data dir:  {}", value["data_dir"].as_str().unwrap_or("?"));
            println!("  model dir: {}", value["model_dir"].as_str().unwrap_or("?"));
        }),
    };

    if cli.json {
        if !value.is_null() {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    } else {
        print(&value);
    }
    Ok(())
}
