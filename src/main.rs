//! kbgraph CLI: build, densify and query the documentation knowledge graph.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use kbgraph::config::GraphConfig;
use kbgraph::graph::{GraphStatistics, KnowledgeGraph, RelationshipType, export};
use kbgraph::infer::InferenceEngine;
use kbgraph::infer::engine::parse_passes;
use kbgraph::ingest;
use kbgraph::node::{Node, NodeType};
use kbgraph::payload::PayloadFilter;
use kbgraph::store::ledger::Bump;

#[derive(Parser)]
#[command(
    name = "kbgraph",
    version,
    about = "Knowledge graph over a smart-contract security corpus"
)]
struct Cli {
    /// Config file. Defaults to ./kbgraph.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the graph store.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base directory that node locations are resolved against.
    #[arg(long, global = true)]
    corpus_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reload nodes and relationships from the ingest JSON.
    Rebuild {
        /// Ingest document. Defaults to `ingest_path` from the config.
        #[arg(long)]
        ingest: Option<PathBuf>,
        /// Load on top of the current graph instead of clearing it.
        #[arg(long)]
        keep_existing: bool,
    },
    /// Run the inference passes and print what they added.
    Enhance {
        /// Only run these passes (repeatable).
        #[arg(long = "pass")]
        passes: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Query the graph.
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Show node/edge counts, version and staleness.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Show or bump the graph version.
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },
    /// Export the whole graph.
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },
}

#[derive(Subcommand)]
enum QueryAction {
    /// Free-text search over names, locations and payloads.
    Search {
        /// Search terms.
        #[arg(required = true)]
        terms: Vec<String>,
        /// Maximum results. Defaults to `search.default_limit`.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Nodes of one type, optionally filtered on payload fields.
    Type {
        /// Node type, e.g. Vulnerability or DeepDive.
        node_type: String,
        /// Payload filter such as `severity=high` or `historical_losses_usd>=1000000`
        /// (repeatable, all must hold).
        #[arg(long = "where")]
        filters: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Nodes connected to a node in either direction.
    Related {
        id: String,
        /// Only this relationship type.
        #[arg(long)]
        rel: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Vulnerabilities by severity and historical loss.
    Vulns {
        #[arg(long)]
        severity: Option<String>,
        /// Minimum historical loss in USD.
        #[arg(long)]
        min_loss: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Direct edge between two nodes, if any.
    Path { source: String, target: String },
    /// Full record of one node as JSON.
    Node { id: String },
}

#[derive(Subcommand)]
enum VersionAction {
    /// Print the current version.
    Show,
    /// Bump the version.
    Bump {
        /// major, minor or patch.
        level: String,
    },
}

#[derive(Subcommand)]
enum ExportAction {
    /// Every node and edge as JSON.
    Json,
    /// Graphviz DOT.
    Dot,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    #[serde(flatten)]
    statistics: &'a GraphStatistics,
    stale: bool,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = GraphConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(corpus_root) = cli.corpus_root {
        config.corpus_root = corpus_root;
    }

    let graph = KnowledgeGraph::open(&config.store_path())?;

    match cli.command {
        Commands::Rebuild {
            ingest: ingest_file,
            keep_existing,
        } => {
            let path = ingest_file.unwrap_or_else(|| config.ingest_path());
            let report = ingest::rebuild(&graph, &path, keep_existing)?;

            println!("Rebuilt graph from {}", path.display());
            println!("  nodes loaded:    {}", report.nodes_loaded);
            println!("  edges loaded:    {}", report.edges_loaded);
            println!("  duplicate edges: {}", report.duplicate_edges);
            if let Some(version) = report.version {
                println!("  version:         {version}");
            }
            if !report.rejected.is_empty() {
                println!("Rejected {} record(s):", report.rejected.len());
                for r in &report.rejected {
                    println!("  {}: {}", r.record, r.reason);
                }
            }
        }

        Commands::Enhance { passes, json } => {
            let mut engine = InferenceEngine::from_config(&config);
            if !passes.is_empty() {
                engine = engine.with_passes(parse_passes(passes.as_slice())?);
            }
            let report = engine.run(&graph)?;

            if json {
                print_json(&report)?;
            } else {
                println!("Edges before: {}", report.edges_before);
                println!("Edges added:  {}", report.edges_added());
                for (rel, added) in &report.added_by_type {
                    println!("  {rel:<22} +{added}");
                }
                println!("Edges after:  {}", report.edges_after);
                println!("Nodes tagged: {}", report.nodes_tagged);
                if !report.skipped.is_empty() {
                    println!("Skipped {} unreadable document(s):", report.skipped.len());
                    for s in &report.skipped {
                        println!("  {} ({}): {}", s.node_id, s.path, s.reason);
                    }
                }
                match report.version {
                    Some(v) => println!("Version: {v}"),
                    None => println!("Graph unchanged"),
                }
            }
        }

        Commands::Query { action } => match action {
            QueryAction::Search { terms, limit, json } => {
                let query = terms.join(" ");
                let limit = limit.unwrap_or(config.search.default_limit);
                let hits = graph.search(&query, limit)?;
                if json {
                    print_json(&hits)?;
                } else if hits.is_empty() {
                    println!("No results for \"{query}\"");
                } else {
                    for (rank, hit) in hits.iter().enumerate() {
                        println!("{:>3}. {}", rank + 1, node_line(&hit.node));
                    }
                }
            }
            QueryAction::Type {
                node_type,
                filters,
                json,
            } => {
                let node_type: NodeType = node_type.parse()?;
                let filters = filters
                    .iter()
                    .map(|f| f.parse::<PayloadFilter>())
                    .collect::<Result<Vec<_>, _>>()?;
                let nodes = if filters.is_empty() {
                    graph.find_by_type(node_type)?
                } else {
                    graph.find_by_predicate(node_type, &filters)?
                };
                print_nodes(&nodes, json)?;
            }
            QueryAction::Related { id, rel, json } => {
                let rel = rel.map(|r| r.parse::<RelationshipType>()).transpose()?;
                let neighbors = graph.neighbors(&id, rel)?;
                if json {
                    print_json(&neighbors)?;
                } else if neighbors.is_empty() && !graph.store().contains_node(&id)? {
                    println!("No node with id {id}");
                } else if neighbors.is_empty() {
                    println!("No nodes related to {id}");
                } else {
                    for n in &neighbors {
                        println!(
                            "{:<9} {:<22} {}",
                            n.direction,
                            n.relationship_type,
                            node_line(&n.node)
                        );
                    }
                }
            }
            QueryAction::Vulns {
                severity,
                min_loss,
                json,
            } => {
                let nodes = graph.find_vulnerabilities(severity.as_deref(), min_loss)?;
                print_nodes(&nodes, json)?;
            }
            QueryAction::Path { source, target } => {
                match graph.shortest_direct_path(&source, &target)? {
                    Some(edge) => println!(
                        "{} -{}-> {}",
                        edge.source_id, edge.relationship_type, edge.target_id
                    ),
                    None => println!("No direct edge from {source} to {target}"),
                }
            }
            QueryAction::Node { id } => match graph.get_node(&id)? {
                Some(node) => print_json(&node)?,
                None => println!("No node with id {id}"),
            },
        },

        Commands::Stats { json } => {
            let statistics = graph.statistics()?;
            let stale = graph.ledger()?.is_stale_on_disk(&config.ingest_path());

            if json {
                print_json(&StatsOutput {
                    statistics: &statistics,
                    stale,
                })?;
            } else {
                println!("Store:       {}", graph.store().location());
                println!("Version:     {}", statistics.version);
                println!("Nodes:       {}", statistics.total_nodes);
                for (t, n) in &statistics.nodes_by_type {
                    println!("  {t:<22} {n}");
                }
                for (s, n) in &statistics.nodes_by_source {
                    println!("  ({s}) {n}");
                }
                println!("Edges:       {}", statistics.total_edges);
                for (r, n) in &statistics.edges_by_type {
                    println!("  {r:<22} {n}");
                }
                println!("Last rebuild: {}", timestamp(statistics.last_rebuild));
                println!("Last enhance: {}", timestamp(statistics.last_enhance));
                if let Some(files) = statistics.kb_files_count {
                    println!("KB files:     {files}");
                }
                if stale {
                    println!("Graph is stale: run `kbgraph rebuild`");
                }
            }
        }

        Commands::Version { action } => match action {
            VersionAction::Show => println!("{}", graph.version()?),
            VersionAction::Bump { level } => {
                let bump: Bump = level.parse()?;
                let version = graph.bump_version(bump)?;
                println!("Bumped to {version}");
            }
        },

        Commands::Export { action } => match action {
            ExportAction::Json => print_json(&export::export_json(&graph)?)?,
            ExportAction::Dot => print!("{}", export::export_dot(&graph)?),
        },
    }

    Ok(())
}

fn node_line(node: &Node) -> String {
    format!("{:<36} {:<18} {}", node.id, node.node_type, node.name)
}

fn print_nodes(nodes: &[Node], json: bool) -> Result<()> {
    if json {
        return print_json(&nodes);
    }
    for node in nodes {
        println!("{}", node_line(node));
    }
    println!("({} node(s))", nodes.len());
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn timestamp(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
}
