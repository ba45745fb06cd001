//! cue-cli — operator frontend for the Cue HTTP control surface.
//!
//! # Subcommands
//! - `health`                         — server liveness
//! - `create-sessions <event-id>`     — create fresh session rows
//! - `test-sessions <event-id>`       — validate sessions before a live run
//! - `start <event-id>`               — start (or resume) an event
//! - `pause <event-id>`               — pause an event
//! - `resume <event-id>`              — resume an event
//! - `status <event-id> [--json]`     — status snapshot

use clap::{Parser, Subcommand};
use uuid::Uuid;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8790";

#[derive(Debug, Parser)]
#[command(
    name = "cue-cli",
    version,
    about = "Cue live-event orchestration — operator CLI"
)]
struct Cli {
    /// Cue HTTP server URL (overrides CUE_HTTP_URL env var)
    #[arg(long, env = "CUE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Cue server health
    Health,

    /// Create fresh agent session rows for an event
    CreateSessions { event_id: Uuid },

    /// Validate freshly created sessions before a live run
    TestSessions { event_id: Uuid },

    /// Start (or resume) an event
    Start { event_id: Uuid },

    /// Pause an event
    Pause { event_id: Uuid },

    /// Resume a paused event
    Resume { event_id: Uuid },

    /// Show an event's status snapshot
    Status {
        event_id: Uuid,

        /// Output the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health => do_health(&cli.server),
        Commands::CreateSessions { event_id } => {
            do_post(&cli.server, &format!("/events/{}/sessions", event_id))
        }
        Commands::TestSessions { event_id } => {
            do_post(&cli.server, &format!("/events/{}/sessions/test", event_id))
        }
        Commands::Start { event_id } => do_post(&cli.server, &format!("/events/{}/start", event_id)),
        Commands::Pause { event_id } => do_post(&cli.server, &format!("/events/{}/pause", event_id)),
        Commands::Resume { event_id } => {
            do_post(&cli.server, &format!("/events/{}/resume", event_id))
        }
        Commands::Status { event_id, json } => do_status(&cli.server, event_id, json),
    }
}

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

fn do_health(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client()?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Cue server:    {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Provider:      {}", body["provider"].as_str().unwrap_or("?"));
            println!(
                "Live runtimes: {}",
                body["live_runtimes"].as_u64().unwrap_or(0)
            );
            Ok(())
        }
        Ok(r) => {
            eprintln!("cue-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("cue-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }
}

fn do_post(server: &str, path: &str) -> anyhow::Result<()> {
    let url = format!("{}{}", server, path);
    let resp = match client()?.post(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("cue-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        eprintln!(
            "cue-cli: server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn do_status(server: &str, event_id: Uuid, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/events/{}/status", server, event_id);
    let resp = match client()?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("cue-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("cue-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Event:       {}", event_id);
    println!(
        "Agent:       {}",
        body["agent_status"].as_str().unwrap_or("unknown")
    );
    println!(
        "Sequences:   transcript {} / cards {} / facts {}",
        body["transcript_last_seq"], body["cards_last_seq"], body["facts_last_seq"]
    );
    println!(
        "Stores:      ring {} / facts {} / cards {}",
        body["ring_len"], body["facts_len"], body["cards_len"]
    );
    if let Some(sessions) = body["sessions"].as_array() {
        for s in sessions {
            println!(
                "Session:     {:10} {}",
                s["agent_type"].as_str().unwrap_or("?"),
                s["state"].as_str().unwrap_or("?")
            );
        }
    }
    if let Some(logs) = body["recent_logs"].as_array() {
        if !logs.is_empty() {
            println!("Recent:");
            for line in logs.iter().rev().take(5) {
                println!("  {}", line.as_str().unwrap_or(""));
            }
        }
    }
    Ok(())
}
