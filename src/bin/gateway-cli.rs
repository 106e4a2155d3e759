use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Operator CLI for the document gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Client bearer token.
    #[arg(short, long, env = "GATEWAY_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness; `--full` also probes the worker
    Health {
        #[arg(long)]
        full: bool,
    },
    /// Worker status
    Status,
    /// Search indexed documents
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<u32>,
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Ask a question
    Ask {
        question: String,
        #[arg(short, long)]
        k: Option<u32>,
    },
    /// Upload a document
    Upload { file: PathBuf },
    /// Export a document (JSONL, or the archive with `--archive`)
    Export {
        #[arg(long)]
        doc_id: Option<String>,
        #[arg(long)]
        archive: bool,
        /// Write the body here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
    }

    match cli.command {
        Commands::Health { full } => {
            let path = if full { "/health/full" } else { "/health" };
            let res = client.get(format!("{}{}", base, path)).send().await?;
            print_response(res).await?;
        }
        Commands::Status => {
            let res = client.get(format!("{}/status", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Search { query, k, doc_id } => {
            let mut params = vec![("q", query)];
            if let Some(k) = k {
                params.push(("k", k.to_string()));
            }
            if let Some(doc_id) = doc_id {
                params.push(("doc_id", doc_id));
            }
            let res = client
                .get(format!("{}/search", base))
                .headers(headers)
                .query(&params)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Ask { question, k } => {
            let mut body = json!({ "question": question });
            if let Some(k) = k {
                body["k"] = json!(k);
            }
            let res = client
                .post(format!("{}/ask", base))
                .headers(headers)
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Upload { file } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let bytes = tokio::fs::read(&file).await?;
            let form = multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(name));
            let res = client
                .post(format!("{}/upload", base))
                .headers(headers)
                .multipart(form)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Export {
            doc_id,
            archive,
            output,
        } => {
            let path = if archive { "/export/archive" } else { "/export" };
            let mut req = client.get(format!("{}{}", base, path)).headers(headers);
            if let Some(doc_id) = doc_id {
                req = req.query(&[("doc_id", doc_id)]);
            }
            let res = req.send().await?;
            let status = res.status();
            if !status.is_success() {
                return print_response(res).await;
            }
            let body = res.bytes().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &body).await?;
                    eprintln!("Wrote {} bytes to {}", body.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&body)),
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
