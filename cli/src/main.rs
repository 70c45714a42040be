//! nlgraph CLI: command-line client for a running nlgraph server

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use nlgraph::nlq::{MutationDecision, MutationPlan, NLQRequest, NLQResponse, QueryContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "nlgraph", version, about = "Ask questions about the graph in plain language")]
struct Cli {
    /// Server HTTP URL
    #[arg(long, default_value = "http://localhost:8090", global = true, env = "NLGRAPH_URL")]
    url: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        question: String,

        /// Graph version to query
        #[arg(long)]
        graph_version: Option<String>,
    },
    /// Describe a graph change and get a plan to confirm
    Propose {
        request: String,

        #[arg(long)]
        graph_version: Option<String>,

        /// Write the plan here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Execute a previously proposed plan
    Confirm { plan: PathBuf },
    /// Discard a previously proposed plan
    Cancel { plan: PathBuf },
    /// Show the graph schema
    Schema,
    /// Get server status
    Status,
    /// Ask questions interactively
    Shell {
        #[arg(long)]
        graph_version: Option<String>,
    },
}

struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// The server answers failures with the same JSON envelope, so the
    /// body is decoded whatever the status code.
    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> CliResult<R> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|_| format!("server returned {}: {}", status, text).into())
    }

    async fn get(&self, path: &str) -> CliResult<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.url);

    let result = match cli.command {
        Commands::Ask {
            question,
            graph_version,
        } => run_ask(&client, &question, graph_version, &cli.format).await,
        Commands::Propose {
            request,
            graph_version,
            out,
        } => run_propose(&client, &request, graph_version, out.as_deref(), &cli.format).await,
        Commands::Confirm { plan } => run_decision(&client, &plan, true, &cli.format).await,
        Commands::Cancel { plan } => run_decision(&client, &plan, false, &cli.format).await,
        Commands::Schema => run_schema(&client, &cli.format).await,
        Commands::Status => run_status(&client, &cli.format).await,
        Commands::Shell { graph_version } => run_shell(&client, graph_version, &cli.format).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn request(text: &str, graph_version: Option<String>) -> NLQRequest {
    let mut request = NLQRequest::new(text);
    if graph_version.is_some() {
        request.context = Some(QueryContext {
            graph_version,
            ..Default::default()
        });
    }
    request
}

async fn run_ask(
    client: &ApiClient,
    question: &str,
    graph_version: Option<String>,
    format: &OutputFormat,
) -> CliResult<()> {
    let response: NLQResponse = client
        .post("/api/nlq/query", &request(question, graph_version))
        .await?;
    print_response(&response, format)
}

async fn run_propose(
    client: &ApiClient,
    text: &str,
    graph_version: Option<String>,
    out: Option<&Path>,
    format: &OutputFormat,
) -> CliResult<()> {
    let response: NLQResponse = client
        .post("/api/nlq/mutation/propose", &request(text, graph_version))
        .await?;

    let Some(plan) = &response.mutation_plan else {
        return print_response(&response, format);
    };

    let plan_json = serde_json::to_string_pretty(plan)?;
    match out {
        Some(path) => {
            std::fs::write(path, &plan_json)?;
            println!("{}", response.message);
            println!("Query: {}", plan.query);
            println!("Plan written to {}", path.display());
        }
        None => println!("{}", plan_json),
    }
    Ok(())
}

async fn run_decision(
    client: &ApiClient,
    plan_path: &Path,
    confirm: bool,
    format: &OutputFormat,
) -> CliResult<()> {
    let plan: MutationPlan = serde_json::from_str(&std::fs::read_to_string(plan_path)?)?;
    let path = if confirm {
        "/api/nlq/mutation/execute"
    } else {
        "/api/nlq/mutation/cancel"
    };
    let response: NLQResponse = client
        .post(path, &MutationDecision { mutation_plan: plan })
        .await?;
    print_response(&response, format)
}

async fn run_schema(client: &ApiClient, format: &OutputFormat) -> CliResult<()> {
    let schema = client.get("/api/schema").await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&schema)?),
        OutputFormat::Table => {
            let mut types = Table::new();
            types.set_content_arrangement(ContentArrangement::Dynamic);
            types.set_header(vec!["Entity type", "Display property", "Description"]);
            for entity in schema["entityTypes"].as_array().into_iter().flatten() {
                types.add_row(vec![
                    text(&entity["name"]),
                    text(&entity["displayProperty"]),
                    text(&entity["description"]),
                ]);
            }
            println!("{}", types);

            let mut rels = Table::new();
            rels.set_header(vec!["From", "Relationship", "To"]);
            for endpoint in schema["relationshipEndpoints"].as_array().into_iter().flatten() {
                rels.add_row(vec![
                    text(&endpoint["from"]),
                    text(&endpoint["relationshipType"]),
                    text(&endpoint["to"]),
                ]);
            }
            println!("{}", rels);
        }
    }
    Ok(())
}

async fn run_status(client: &ApiClient, format: &OutputFormat) -> CliResult<()> {
    let status = client.get("/api/status").await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => {
            println!("Status:  {}", text(&status["status"]));
            println!("Version: {}", text(&status["version"]));
            println!("Backend: {}", text(&status["backend"]));
            println!("Graph:   {}", text(&status["defaultGraphVersion"]));
        }
    }
    Ok(())
}

async fn run_shell(
    client: &ApiClient,
    graph_version: Option<String>,
    format: &OutputFormat,
) -> CliResult<()> {
    println!("nlgraph interactive shell");
    println!("Ask a question, or :quit to exit.\n");

    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        eprint!("nlgraph> ");

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }

        match line.trim() {
            "" => continue,
            ":quit" | ":exit" | ":q" => break,
            ":status" => {
                if let Err(e) = run_status(client, format).await {
                    eprintln!("Error: {}", e);
                }
            }
            question => {
                if let Err(e) = run_ask(client, question, graph_version.clone(), format).await {
                    eprintln!("Error: {}", e);
                }
            }
        }
    }

    println!("Bye!");
    Ok(())
}

fn print_response(response: &NLQResponse, format: &OutputFormat) -> CliResult<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.message);
    if let Some(clarification) = &response.needs_clarification {
        for option in &clarification.options {
            println!("  - {}", option);
        }
    }

    let Some(result) = &response.query_result else {
        return Ok(());
    };

    if !result.graph_data.nodes.is_empty() {
        let mut nodes = Table::new();
        nodes.set_content_arrangement(ContentArrangement::Dynamic);
        nodes.set_header(vec!["Id", "Type", "Name"]);
        for node in &result.graph_data.nodes {
            nodes.add_row(vec![node.id.clone(), node.group.clone(), node.label.clone()]);
        }
        println!("{}", nodes);
    }

    if !result.graph_data.edges.is_empty() {
        let mut edges = Table::new();
        edges.set_header(vec!["From", "Relationship", "To"]);
        for edge in &result.graph_data.edges {
            edges.add_row(vec![edge.from.clone(), edge.edge_type.clone(), edge.to.clone()]);
        }
        println!("{}", edges);
    }

    println!("{}", result.summary);
    println!("Query: {}", result.query);
    println!("({} ms)", result.execution_time_ms);
    Ok(())
}

fn text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
