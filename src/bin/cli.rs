// Interview RTC CLI Validation Tool
// Validates signaling, peer negotiation and collab sync through automated
// scenarios and interactive commands

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use urlencoding;

use interview_rtc::collab::{CollabClientEvent, Debouncer, DEBOUNCE_QUIET_PERIOD};
use interview_rtc::peer::{
    create_webrtc_api, LocalMedia, PeerManager, PeerManagerConfig, PeerUpdate, RtcSessionFactory,
};
use interview_rtc::signal::{ClientEvent, ServerEvent};

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Parser)]
#[command(name = "rtc-cli")]
#[command(about = "Interview RTC CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Join a room as a headless participant with live peer negotiation
    Join {
        /// Room ID to join
        #[arg(short, long)]
        room_id: String,

        /// Stable application-level user ID
        #[arg(short, long)]
        user_id: String,
    },

    /// Join a collab session and watch code/whiteboard updates
    Collab {
        /// Assessment ID
        #[arg(short, long)]
        assessment_id: String,

        /// Question ID
        #[arg(short, long)]
        question_id: String,

        /// Candidate ID
        #[arg(short, long)]
        candidate_id: String,

        /// Send this code (debounced) after joining
        #[arg(long)]
        code: Option<String>,
    },

    /// Submit code to the execution judge
    Execute {
        /// Source code to run
        #[arg(short, long)]
        code: String,

        /// Language identifier
        #[arg(short, long)]
        language: String,

        /// Program stdin
        #[arg(short, long, default_value = "")]
        input: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send custom signaling events
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Join { room_id, user_id } => {
            join_room(&cli.server, room_id, user_id).await;
        }
        Commands::Collab {
            assessment_id,
            question_id,
            candidate_id,
            code,
        } => {
            collab_session(
                &cli.server,
                assessment_id,
                question_id,
                candidate_id,
                code.as_deref(),
            )
            .await;
        }
        Commands::Execute {
            code,
            language,
            input,
        } => {
            execute_code(&cli.server, code, language, input).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = format!("ws://{}/signal", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);

            let (_, mut read) = ws_stream.split();
            match recv_json(&mut read, 3).await {
                Some(welcome) if welcome["type"] == "welcome" => {
                    println!(
                        "{} Assigned connection id: {}",
                        "✓".green(),
                        welcome["id"].as_str().unwrap_or("unknown").bold()
                    );
                }
                _ => {
                    println!("{} No welcome frame received", "✗".yellow());
                }
            }
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

async fn join_room(server: &str, room_id: &str, user_id: &str) {
    println!("{}", "Joining room...".cyan());
    println!("  Room ID: {}", room_id);
    println!("  User ID: {}", user_id);

    let url = format!("ws://{}/signal", server);

    let ws_stream = match connect_async(&url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // First frame carries our transport-assigned connection id
    let conn_id = match recv_server_event(&mut read, 5).await {
        Some(ServerEvent::Welcome { id }) => id,
        _ => {
            println!("{} No welcome frame received", "✗".red());
            return;
        }
    };
    println!("{} Connection id: {}", "✓".green(), conn_id.bold());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<PeerUpdate>();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let factory = Arc::new(RtcSessionFactory::new(create_webrtc_api(), event_tx));
    let manager = PeerManager::new(
        conn_id.clone(),
        out_tx,
        update_tx,
        factory,
        Arc::new(LocalMedia::new(true, true)),
        PeerManagerConfig::from_env(),
    );
    manager.clone().spawn_event_pump(event_rx);

    let join = ClientEvent::JoinRoom {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
    };
    if write
        .send(Message::Text(serde_json::to_string(&join).unwrap()))
        .await
        .is_err()
    {
        println!("{} Failed to send join-room", "✗".red());
        return;
    }
    println!("{} join-room sent", "✓".green());
    println!("Press {} to leave.\n", "Ctrl+C".bold());

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(event) = outbound else { break };
                let text = serde_json::to_string(&event).unwrap();
                println!("{} {}", "▶".cyan(), text);
                if write.send(Message::Text(text)).await.is_err() {
                    println!("{} Failed to send signaling event", "✗".red());
                    break;
                }
            }
            update = update_rx.recv() => {
                match update {
                    Some(PeerUpdate::LinkStateChanged { remote_id, state }) => {
                        println!("{} Link to {} is now {}", "●".yellow(), remote_id.bold(), state);
                    }
                    Some(PeerUpdate::RemoteTrackAdded { remote_id, kind, .. }) => {
                        println!("{} Remote {} track from {}", "●".green(), kind, remote_id.bold());
                    }
                    Some(PeerUpdate::HostChanged { host_id }) => {
                        match host_id {
                            Some(id) => println!("{} Host is {}", "●".cyan(), id.bold()),
                            None => println!("{} Host left, waiting for election", "●".yellow()),
                        }
                    }
                    None => break,
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        println!("{} {}", "◀".green(), text.bright_white());
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = manager.handle_server_event(event).await {
                                    println!("{} {}", "✗".yellow(), e);
                                }
                            }
                            Err(e) => {
                                println!("{} Unparseable server event: {}", "✗".yellow(), e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{} Server closed the connection", "✗".yellow());
                        manager.handle_transport_down().await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        println!("{} Connection error: {}", "✗".red(), e);
                        manager.handle_transport_down().await;
                        break;
                    }
                }
            }
        }
    }
}

async fn collab_session(
    server: &str,
    assessment_id: &str,
    question_id: &str,
    candidate_id: &str,
    code: Option<&str>,
) {
    println!("{}", "Joining collab session...".cyan());
    println!("  Assessment: {}", assessment_id);
    println!("  Question: {}", question_id);

    let url = format!(
        "ws://{}/collab?assessmentId={}&questionId={}&candidateId={}",
        server,
        urlencoding::encode(assessment_id),
        urlencoding::encode(question_id),
        urlencoding::encode(candidate_id)
    );

    let ws_stream = match connect_async(&url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    match recv_json(&mut read, 5).await {
        Some(initial) if initial["type"] == "load-initial-state" => {
            println!("{} Initial state received", "✓".green());
            println!("\n{}", "─".repeat(50));
            println!("{}", initial["code"].as_str().unwrap_or(""));
            println!("{}", "─".repeat(50));
            let elements = initial["whiteboard"].as_array().map(|a| a.len()).unwrap_or(0);
            println!("  Whiteboard elements: {}", elements);
        }
        _ => {
            println!("{} No initial state received", "✗".red());
            return;
        }
    }

    if let Some(code) = code {
        // Route through the same debounce path a live editor uses
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(DEBOUNCE_QUIET_PERIOD, out_tx);
        debouncer.push(code.to_string());

        if let Some(final_code) = out_rx.recv().await {
            let event = CollabClientEvent::CodeChange { code: final_code };
            if write
                .send(Message::Text(serde_json::to_string(&event).unwrap()))
                .await
                .is_ok()
            {
                println!("{} code-change sent", "✓".green());
            } else {
                println!("{} Failed to send code-change", "✗".red());
                return;
            }
        }
    }

    println!("\n{}", "Watching for updates...".yellow());
    println!("Press {} to leave.\n", "Ctrl+C".bold());

    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => {
                println!("{} {}", "◀".green(), text.bright_white());
            }
            Ok(Message::Close(_)) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
        }
    }
}

async fn execute_code(server: &str, code: &str, language: &str, input: &str) {
    println!("{}", "Submitting code to judge...".cyan());

    let url = format!("http://{}/collab/execute", server);
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "code": code,
        "language": language,
        "input": input,
    });

    match client.post(&url).json(&body).send().await {
        Ok(resp) => {
            let status = resp.status();
            match resp.json::<serde_json::Value>().await {
                Ok(verdict) => {
                    if verdict["success"].as_bool().unwrap_or(false) {
                        println!("{} Execution succeeded", "✓".green());
                    } else {
                        println!("{} Execution failed ({})", "✗".red(), status);
                    }
                    let stdout = verdict["stdout"].as_str().unwrap_or("");
                    let stderr = verdict["stderr"].as_str().unwrap_or("");
                    if !stdout.is_empty() {
                        println!("\n{}\n{}", "stdout:".bold(), stdout);
                    }
                    if !stderr.is_empty() {
                        println!("\n{}\n{}", "stderr:".bold(), stderr.red());
                    }
                }
                Err(e) => {
                    println!("{} Could not parse verdict: {}", "✗".red(), e);
                }
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("\n{}", "Signaling:".bold().cyan());
    println!("  {} - Basic WebSocket connection and welcome frame", "connection".cyan());
    println!("  {} - First joiner becomes host", "host-election".cyan());
    println!("  {} - Second joiner receives host info, host sees user-connected", "second-join".cyan());
    println!("  {} - Relay to an absent member is dropped gracefully", "relay-absent".cyan());
    println!("\n{}", "Collab:".bold().cyan());
    println!("  {} - First subscriber receives initial state", "collab-initial-state".cyan());
    println!("  {} - Code change fans out to the other subscriber", "collab-code-sync".cyan());
    println!("\nExample: rtc-cli validate --scenario host-election");
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "connection" => validate_connection(server).await,
        "host-election" => validate_host_election(server).await,
        "second-join" => validate_second_join(server).await,
        "relay-absent" => validate_relay_absent(server).await,
        "collab-initial-state" => validate_collab_initial_state(server).await,
        "collab-code-sync" => validate_collab_code_sync(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    if result {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let scenarios = vec![
        "connection",
        "host-election",
        "second-join",
        "relay-absent",
        "collab-initial-state",
        "collab-code-sync",
    ];

    let mut passed = 0;
    let mut failed = 0;

    for scenario in scenarios {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        let result = match scenario {
            "connection" => validate_connection(server).await,
            "host-election" => validate_host_election(server).await,
            "second-join" => validate_second_join(server).await,
            "relay-absent" => validate_relay_absent(server).await,
            "collab-initial-state" => validate_collab_initial_state(server).await,
            "collab-code-sync" => validate_collab_code_sync(server).await,
            _ => false,
        };

        if result {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed! 🎉".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn validate_connection(server: &str) -> bool {
    let url = format!("ws://{}/signal", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            let (_, mut read) = ws_stream.split();
            match recv_json(&mut read, 3).await {
                Some(welcome) if welcome["type"] == "welcome" => {
                    println!(
                        "{} Welcome frame received: {}",
                        "✓".green(),
                        welcome["id"].as_str().unwrap_or("unknown")
                    );
                    true
                }
                _ => {
                    println!("{} No welcome frame", "✗".red());
                    false
                }
            }
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_host_election(server: &str) -> bool {
    let room_id = unique_room_id();
    println!("  Joining empty room {}...", room_id);

    let Some((mut write, mut read, _)) = open_signal(server).await else {
        return false;
    };

    if !send_join(&mut write, &room_id, "validator-host").await {
        return false;
    }

    match recv_json(&mut read, 3).await {
        Some(event) if event["type"] == "host-assigned" => {
            if event["isHost"].as_bool() == Some(true) {
                println!("{} First joiner was assigned host", "✓".green());
                true
            } else {
                println!("{} host-assigned carried isHost=false", "✗".red());
                false
            }
        }
        Some(event) => {
            println!("{} Unexpected event: {}", "✗".yellow(), event["type"]);
            false
        }
        None => {
            println!("{} No response received", "✗".red());
            false
        }
    }
}

async fn validate_second_join(server: &str) -> bool {
    let room_id = unique_room_id();
    println!("  Step 1: First member joins {} and becomes host...", room_id);

    let Some((mut host_write, mut host_read, host_id)) = open_signal(server).await else {
        return false;
    };
    if !send_join(&mut host_write, &room_id, "validator-host").await {
        return false;
    }
    match recv_json(&mut host_read, 3).await {
        Some(event) if event["type"] == "host-assigned" => {
            println!("  {} Host elected: {}", "✓".green(), host_id);
        }
        _ => {
            println!("{} Host election did not happen", "✗".red());
            return false;
        }
    }

    println!("  Step 2: Second member joins while host stays connected...");
    let Some((mut guest_write, mut guest_read, _)) = open_signal(server).await else {
        return false;
    };
    if !send_join(&mut guest_write, &room_id, "validator-guest").await {
        return false;
    }

    let mut saw_host_info = false;
    let mut saw_existing_users = false;
    for _ in 0..2 {
        match recv_json(&mut guest_read, 3).await {
            Some(event) if event["type"] == "host-info" => {
                if event["hostId"].as_str() == Some(host_id.as_str()) {
                    saw_host_info = true;
                    println!("  {} Guest learned host id", "✓".green());
                }
            }
            Some(event) if event["type"] == "existing-users" => {
                saw_existing_users = true;
                println!("  {} Guest received existing users", "✓".green());
            }
            _ => break,
        }
    }

    let host_notified = matches!(
        recv_json(&mut host_read, 3).await,
        Some(event) if event["type"] == "user-connected"
    );
    if host_notified {
        println!("  {} Host received user-connected", "✓".green());
    } else {
        println!("{} Host did not see the new member", "✗".red());
    }

    saw_host_info && saw_existing_users && host_notified
}

async fn validate_relay_absent(server: &str) -> bool {
    let room_id = unique_room_id();
    println!("  Sending offer to a member that does not exist...");

    let Some((mut write, mut read, _)) = open_signal(server).await else {
        return false;
    };
    if !send_join(&mut write, &room_id, "validator-relay").await {
        return false;
    }
    // host-assigned for the empty room
    recv_json(&mut read, 3).await;

    let offer = serde_json::json!({
        "type": "offer",
        "to": "no-such-member",
        "sdp": {"type": "offer", "sdp": "v=0 validator"}
    });
    if write.send(Message::Text(offer.to_string())).await.is_err() {
        println!("{} Failed to send offer", "✗".red());
        return false;
    }

    // The server must drop it silently and keep the connection alive
    match timeout(Duration::from_secs(2), read.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
            println!("{} Server closed the connection", "✗".red());
            false
        }
        _ => {
            println!("{} Relay to absent member dropped gracefully", "✓".green());
            true
        }
    }
}

async fn validate_collab_initial_state(server: &str) -> bool {
    let (assessment, question) = unique_session_ids();
    let url = collab_url(server, &assessment, &question, "validator-a");

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            let (_, mut read) = ws_stream.split();
            match recv_json(&mut read, 3).await {
                Some(event) if event["type"] == "load-initial-state" => {
                    println!(
                        "{} Initial state received ({} bytes of code)",
                        "✓".green(),
                        event["code"].as_str().map(str::len).unwrap_or(0)
                    );
                    true
                }
                _ => {
                    println!("{} No initial state received", "✗".red());
                    false
                }
            }
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_collab_code_sync(server: &str) -> bool {
    let (assessment, question) = unique_session_ids();
    println!("  Connecting two subscribers to the same session...");

    let first = connect_async(collab_url(server, &assessment, &question, "validator-a")).await;
    let second = connect_async(collab_url(server, &assessment, &question, "validator-b")).await;

    let (Ok((first_stream, _)), Ok((second_stream, _))) = (first, second) else {
        println!("{} Connection failed", "✗".red());
        return false;
    };

    let (mut first_write, mut first_read) = first_stream.split();
    let (_, mut second_read) = second_stream.split();

    // Both get their initial state first
    if recv_json(&mut first_read, 3).await.is_none()
        || recv_json(&mut second_read, 3).await.is_none()
    {
        println!("{} Missing initial state", "✗".red());
        return false;
    }

    let change = serde_json::json!({"type": "code-change", "code": "print('synced')"});
    if first_write
        .send(Message::Text(change.to_string()))
        .await
        .is_err()
    {
        println!("{} Failed to send code-change", "✗".red());
        return false;
    }

    match recv_json(&mut second_read, 3).await {
        Some(event)
            if event["type"] == "code-update" && event["code"] == "print('synced')" =>
        {
            println!("{} Second subscriber received the update", "✓".green());
        }
        _ => {
            println!("{} Update did not reach the second subscriber", "✗".red());
            return false;
        }
    }

    // The sender must not receive its own echo
    match timeout(Duration::from_secs(1), first_read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            println!("{} Sender received an echo: {}", "✗".red(), text);
            false
        }
        _ => {
            println!("{} No echo back to the sender", "✓".green());
            true
        }
    }
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let url = format!("ws://{}/signal", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} Connected to server", "✓".green());

            let (mut write, mut read) = ws_stream.split();

            // Spawn task to receive messages
            let receive_task = tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("\n{} {}", "◀".green(), text.bright_white());
                    }
                }
            });

            // Main input loop
            loop {
                print!("{} ", "►".cyan());
                io::stdout().flush().unwrap();

                let mut input = String::new();
                if io::stdin().read_line(&mut input).is_err() {
                    break;
                }

                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                if input == "help" {
                    print_interactive_help();
                    continue;
                }

                // Try to parse as JSON and send
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(input) {
                    if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                        println!("{} Message sent", "✓".green());
                    } else {
                        println!("{} Failed to send message", "✗".red());
                        break;
                    }
                } else {
                    println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
                }
            }

            receive_task.abort();
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON events directly to the signaling endpoint.\n");

    println!("{}", "Example Events:".bold());
    println!("\n{}:", "Join Room".cyan());
    println!(r#"  {{"type":"join-room","roomId":"interview-1","userId":"alice"}}"#);

    println!("\n{}:", "Offer".cyan());
    println!(r#"  {{"type":"offer","to":"<connId>","sdp":{{"type":"offer","sdp":"v=0 ..."}}}}"#);

    println!("\n{}:", "ICE Candidate".cyan());
    println!(r#"  {{"type":"ice-candidate","to":"<connId>","candidate":{{"candidate":"candidate:...","sdpMid":"0","sdpMLineIndex":0}}}}"#);

    println!("\n{}:", "Leave".cyan());
    println!(r#"  {{"type":"leave-room"}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}

// Helpers shared by the validation scenarios

async fn open_signal(server: &str) -> Option<(SignalWrite, WsRead, String)> {
    let url = format!("ws://{}/signal", server);
    let ws_stream = match connect_async(&url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            return None;
        }
    };
    let (write, mut read) = ws_stream.split();

    match recv_json(&mut read, 3).await {
        Some(welcome) if welcome["type"] == "welcome" => {
            let conn_id = welcome["id"].as_str().unwrap_or("unknown").to_string();
            Some((write, read, conn_id))
        }
        _ => {
            println!("{} No welcome frame", "✗".red());
            None
        }
    }
}

type SignalWrite =
    futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

async fn send_join(write: &mut SignalWrite, room_id: &str, user_id: &str) -> bool {
    let msg = serde_json::json!({
        "type": "join-room",
        "roomId": room_id,
        "userId": user_id,
    });
    if write.send(Message::Text(msg.to_string())).await.is_err() {
        println!("{} Failed to send join-room", "✗".red());
        return false;
    }
    true
}

async fn recv_json(read: &mut WsRead, secs: u64) -> Option<serde_json::Value> {
    loop {
        match timeout(Duration::from_secs(secs), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(value) = serde_json::from_str(&text) {
                    return Some(value);
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn recv_server_event(read: &mut WsRead, secs: u64) -> Option<ServerEvent> {
    let value = recv_json(read, secs).await?;
    serde_json::from_value(value).ok()
}

fn unique_room_id() -> String {
    format!("validator-room-{}", now_millis())
}

fn unique_session_ids() -> (String, String) {
    let ts = now_millis();
    (format!("validator-assessment-{}", ts), format!("q-{}", ts))
}

fn collab_url(server: &str, assessment: &str, question: &str, candidate: &str) -> String {
    format!(
        "ws://{}/collab?assessmentId={}&questionId={}&candidateId={}",
        server,
        urlencoding::encode(assessment),
        urlencoding::encode(question),
        urlencoding::encode(candidate)
    )
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
