// Exam Proctor CLI
// Operator tool that checks a running proctor server and drives the WebSocket protocol by hand

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "proctor-cli")]
#[command(about = "Exam Proctor Server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:5000)
    #[arg(short, long, default_value = "127.0.0.1:5000")]
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

    /// Join an exam room as proctor
    ProctorJoin {
        #[arg(short, long)]
        exam_id: String,

        /// Keep connection alive and print room events (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Join an exam room as student and send heartbeats
    StudentJoin {
        #[arg(short, long)]
        exam_id: String,

        #[arg(short = 'u', long)]
        student_id: String,

        /// Number of heartbeats to send after joining
        #[arg(long, default_value_t = 3)]
        heartbeats: u32,

        /// Seconds between heartbeats
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },

    /// Ask the server which students are online in an exam
    Status {
        #[arg(short, long)]
        exam_id: String,
    },

    /// File a suspicious-activity report as proctor
    Report {
        #[arg(short, long)]
        exam_id: String,

        #[arg(short = 'u', long)]
        student_id: String,

        /// no_face_visible, multiple_faces, looking_away, unusual_movement or other
        #[arg(short = 't', long)]
        incident_type: String,

        #[arg(short, long)]
        description: Option<String>,
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

    /// Interactive mode - send custom messages
    Interactive,
}

const SCENARIOS: &[(&str, &str)] = &[
    ("connection", "Basic WebSocket connection test"),
    ("ping", "Ping/pong round trip"),
    ("proctor-join", "Proctor joins an exam room"),
    ("student-join", "Student join is announced to the proctor"),
    ("heartbeat-heal", "Heartbeat without join restores room membership"),
    ("incident", "Incident report is acknowledged and broadcast"),
    ("invalid-join", "Join without exam id is rejected"),
    ("disconnect", "Student disconnect is announced to the proctor"),
];

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
        Commands::ProctorJoin { exam_id, keep_alive } => {
            proctor_join(&cli.server, exam_id, *keep_alive).await;
        }
        Commands::StudentJoin {
            exam_id,
            student_id,
            heartbeats,
            interval,
        } => {
            student_join(&cli.server, exam_id, student_id, *heartbeats, *interval).await;
        }
        Commands::Status { exam_id } => {
            connection_status(&cli.server, exam_id).await;
        }
        Commands::Report {
            exam_id,
            student_id,
            incident_type,
            description,
        } => {
            report_incident(&cli.server, exam_id, student_id, incident_type, description.as_deref()).await;
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

fn ws_url(server: &str) -> String {
    format!("ws://{}/proctor/ws", server)
}

fn frame(event: &str, data: Value) -> Message {
    Message::Text(json!({ "type": event, "data": data }).to_string())
}

async fn connect(server: &str) -> Option<WsStream> {
    match connect_async(ws_url(server)).await {
        Ok((ws_stream, _)) => Some(ws_stream),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
            None
        }
    }
}

/// Reads frames until one of type `event` arrives or `secs` elapse
async fn wait_for<S>(read: &mut S, event: &str, secs: u64) -> Option<Value>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = Instant::now() + Duration::from_secs(secs);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    if value["type"] == event {
                        return Some(value);
                    }
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Error receiving message: {}", "✗".red(), e);
                return None;
            }
            Ok(None) | Err(_) => return None,
        }
    }
}

fn print_ack(ack: &Value) -> bool {
    let success = ack["data"]["success"].as_bool().unwrap_or(false);
    if success {
        println!("{} {} received", "✓".green(), ack["type"].as_str().unwrap_or("ack"));
    } else {
        println!(
            "{} {} failed: {}",
            "✗".red(),
            ack["type"].as_str().unwrap_or("ack"),
            ack["data"]["error"].as_str().unwrap_or("unknown error")
        );
    }
    success
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/proctor/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Connections: {}", body["connections"]);
                    println!("  Rooms: {}", body["rooms"]);
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

    let url = format!("http://{}/proctor/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("\nConfiguration:");
                    match serde_json::to_string_pretty(&body) {
                        Ok(pretty) => println!("{}", pretty),
                        Err(_) => println!("{}", body),
                    }
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

    if let Some(ws_stream) = connect(server).await {
        println!("{} WebSocket connection established", "✓".green());
        println!("  URL: {}", ws_url(server));
        drop(ws_stream);
        println!("{} Connection closed cleanly", "✓".green());
    }
}

async fn proctor_join(server: &str, exam_id: &str, keep_alive: bool) {
    println!("{}", "Joining exam as proctor...".cyan());
    println!("  Exam ID: {}", exam_id);

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    if write
        .send(frame("proctor-join", json!({ "examId": exam_id })))
        .await
        .is_err()
    {
        println!("{} Failed to send proctor-join", "✗".red());
        return;
    }

    let joined = match wait_for(&mut read, "proctor-join-ack", 5).await {
        Some(ack) => print_ack(&ack),
        None => {
            println!("{} Timeout waiting for proctor-join-ack", "✗".red());
            false
        }
    };

    if !joined {
        return;
    }

    println!("\n{}", "═".repeat(50).green());
    println!("{} {}", "Monitoring exam:".bold(), exam_id.green().bold());
    println!("{}", "═".repeat(50).green());

    if !keep_alive {
        println!("\n{}", "⚠ Note: Connection closed. Students will see the proctor leave.".yellow());
        println!("Use {} to keep monitoring.", "--keep-alive".cyan());
        return;
    }

    println!("Press {} to disconnect.", "Ctrl+C".bold());

    loop {
        match timeout(Duration::from_secs(30), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                println!("{} {}", "◀".green(), text.bright_white());
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Err(_) => {
                // Quiet room, keep our presence fresh
                if write
                    .send(frame("proctor-heartbeat", json!({ "examId": exam_id })))
                    .await
                    .is_err()
                {
                    println!("{} Failed to send heartbeat", "✗".red());
                    break;
                }
            }
        }
    }
}

async fn student_join(server: &str, exam_id: &str, student_id: &str, heartbeats: u32, interval: u64) {
    println!("{}", "Joining exam as student...".cyan());
    println!("  Exam ID: {}", exam_id);
    println!("  Student ID: {}", student_id);

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();
    let payload = json!({ "examId": exam_id, "studentId": student_id });

    if write.send(frame("student-join", payload.clone())).await.is_err() {
        println!("{} Failed to send student-join", "✗".red());
        return;
    }

    match wait_for(&mut read, "student-join-ack", 5).await {
        Some(ack) => {
            if !print_ack(&ack) {
                return;
            }
        }
        None => {
            println!("{} Timeout waiting for student-join-ack", "✗".red());
            return;
        }
    }

    for beat in 1..=heartbeats {
        sleep(Duration::from_secs(interval)).await;

        if write.send(frame("student-heartbeat", payload.clone())).await.is_err() {
            println!("{} Failed to send heartbeat {}", "✗".red(), beat);
            return;
        }
        match wait_for(&mut read, "heartbeat-ack", 5).await {
            Some(_) => println!("{} Heartbeat {}/{} acknowledged", "✓".green(), beat, heartbeats),
            None => println!("{} Heartbeat {}/{} not acknowledged", "✗".yellow(), beat, heartbeats),
        }
    }
}

async fn connection_status(server: &str, exam_id: &str) {
    println!("{}", "Requesting connection status...".cyan());

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    if write
        .send(frame("request-connection-status", json!({ "examId": exam_id })))
        .await
        .is_err()
    {
        println!("{} Failed to send request", "✗".red());
        return;
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut online = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                match value["type"].as_str() {
                    Some("student-online") => online.push(value["data"]["studentId"].to_string()),
                    Some("connection-status-response") => {
                        println!("{} Exam {}", "✓".green(), exam_id.bold());
                        println!("  Proctors: {}", value["data"]["connectedProctors"]);
                        println!("  Students: {}", value["data"]["connectedStudents"]);
                        for student in &online {
                            println!("    {} {}", "●".green(), student);
                        }
                        return;
                    }
                    _ => {}
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => {
                println!("{} No status response received", "✗".red());
                return;
            }
        }
    }
}

async fn report_incident(
    server: &str,
    exam_id: &str,
    student_id: &str,
    incident_type: &str,
    description: Option<&str>,
) {
    println!("{}", "Reporting suspicious activity...".cyan());

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    let _ = write
        .send(frame("proctor-join", json!({ "examId": exam_id })))
        .await;
    if wait_for(&mut read, "proctor-join-ack", 5).await.is_none() {
        println!("{} Could not join exam {}", "✗".red(), exam_id);
        return;
    }

    let report = json!({
        "examId": exam_id,
        "studentId": student_id,
        "type": incident_type,
        "description": description,
    });
    if write.send(frame("report-suspicious-activity", report)).await.is_err() {
        println!("{} Failed to send report", "✗".red());
        return;
    }

    match wait_for(&mut read, "incident-report-sent", 5).await {
        Some(ack) => {
            if print_ack(&ack) {
                println!("  Incident ID: {}", ack["data"]["incidentId"]);
            }
        }
        None => println!("{} Timeout waiting for incident-report-sent", "✗".red()),
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    for (name, description) in SCENARIOS {
        println!("  {} - {}", name.cyan(), description);
    }
    println!("\nExample: proctor-cli validate --scenario heartbeat-heal");
}

async fn dispatch_scenario(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "connection" => validate_connection(server).await,
        "ping" => validate_ping(server).await,
        "proctor-join" => validate_proctor_join(server).await,
        "student-join" => validate_student_join(server).await,
        "heartbeat-heal" => validate_heartbeat_heal(server).await,
        "incident" => validate_incident(server).await,
        "invalid-join" => validate_invalid_join(server).await,
        "disconnect" => validate_disconnect(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match dispatch_scenario(server, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for (scenario, _) in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if dispatch_scenario(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(300)).await;
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

fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

async fn validate_connection(server: &str) -> bool {
    match connect(server).await {
        Some(ws_stream) => {
            println!("{} WebSocket connection successful", "✓".green());
            drop(ws_stream);
            true
        }
        None => false,
    }
}

async fn validate_ping(server: &str) -> bool {
    let Some(ws_stream) = connect(server).await else {
        return false;
    };
    let (mut write, mut read) = ws_stream.split();

    if write.send(frame("ping", Value::Null)).await.is_err() {
        println!("{} Failed to send ping", "✗".red());
        return false;
    }

    match wait_for(&mut read, "pong", 3).await {
        Some(pong) => {
            println!("{} pong from socket {}", "✓".green(), pong["data"]["socketId"]);
            true
        }
        None => {
            println!("{} No pong received", "✗".red());
            false
        }
    }
}

async fn validate_proctor_join(server: &str) -> bool {
    let exam_id = unique_id("validate-exam");
    let Some(ws_stream) = connect(server).await else {
        return false;
    };
    let (mut write, mut read) = ws_stream.split();

    if write
        .send(frame("proctor-join", json!({ "examId": exam_id })))
        .await
        .is_err()
    {
        println!("{} Failed to send proctor-join", "✗".red());
        return false;
    }

    match wait_for(&mut read, "proctor-join-ack", 3).await {
        Some(ack) => print_ack(&ack) && ack["data"]["examId"] == exam_id.as_str(),
        None => {
            println!("{} No acknowledgment received", "✗".red());
            false
        }
    }
}

/// Joins a proctor and returns its halves once the join is acknowledged
async fn joined_proctor(
    server: &str,
    exam_id: &str,
) -> Option<(
    futures::stream::SplitSink<WsStream, Message>,
    futures::stream::SplitStream<WsStream>,
)> {
    let ws_stream = connect(server).await?;
    let (mut write, mut read) = ws_stream.split();

    write
        .send(frame("proctor-join", json!({ "examId": exam_id })))
        .await
        .ok()?;
    let ack = wait_for(&mut read, "proctor-join-ack", 3).await?;
    if !print_ack(&ack) {
        return None;
    }
    Some((write, read))
}

async fn validate_student_join(server: &str) -> bool {
    let exam_id = unique_id("validate-exam");
    println!("  Step 1: Proctor joins {}...", exam_id);
    let Some((_proctor_write, mut proctor_read)) = joined_proctor(server, &exam_id).await else {
        return false;
    };

    println!("  Step 2: Student joins...");
    let Some(student) = connect(server).await else {
        return false;
    };
    let (mut student_write, mut student_read) = student.split();
    let _ = student_write
        .send(frame("student-join", json!({ "examId": exam_id, "studentId": "validator-student" })))
        .await;

    let acked = match wait_for(&mut student_read, "student-join-ack", 3).await {
        Some(ack) => print_ack(&ack),
        None => false,
    };

    println!("  Step 3: Proctor sees student-connected...");
    match wait_for(&mut proctor_read, "student-connected", 3).await {
        Some(event) if acked => {
            println!("{} Proctor notified about {}", "✓".green(), event["data"]["studentId"]);
            true
        }
        _ => {
            println!("{} Proctor was not notified", "✗".red());
            false
        }
    }
}

async fn validate_heartbeat_heal(server: &str) -> bool {
    let exam_id = unique_id("validate-exam");
    let Some((_proctor_write, mut proctor_read)) = joined_proctor(server, &exam_id).await else {
        return false;
    };

    println!("  Student heartbeats without joining first...");
    let Some(student) = connect(server).await else {
        return false;
    };
    let (mut student_write, mut student_read) = student.split();
    let _ = student_write
        .send(frame("student-heartbeat", json!({ "examId": exam_id, "studentId": "healed-student" })))
        .await;

    let acked = wait_for(&mut student_read, "heartbeat-ack", 3).await.is_some();
    let online = wait_for(&mut proctor_read, "student-online", 3).await.is_some();

    if acked && online {
        println!("{} Student restored to room via heartbeat", "✓".green());
        true
    } else {
        println!("{} Heartbeat did not restore membership (ack: {}, online: {})", "✗".red(), acked, online);
        false
    }
}

async fn validate_incident(server: &str) -> bool {
    let exam_id = unique_id("validate-exam");
    let Some((mut reporter_write, mut reporter_read)) = joined_proctor(server, &exam_id).await else {
        return false;
    };
    let Some((_observer_write, mut observer_read)) = joined_proctor(server, &exam_id).await else {
        return false;
    };

    let _ = reporter_write
        .send(frame(
            "report-suspicious-activity",
            json!({ "examId": exam_id, "studentId": "validator-student", "type": "multiple_faces" }),
        ))
        .await;

    let acked = match wait_for(&mut reporter_read, "incident-report-sent", 3).await {
        Some(ack) => print_ack(&ack),
        None => false,
    };

    match wait_for(&mut observer_read, "suspicious-activity", 3).await {
        Some(event) if acked => {
            println!("{} Broadcast description: {}", "✓".green(), event["data"]["description"]);
            event["data"]["description"] == "Multiple faces detected"
        }
        _ => {
            println!("{} Incident was not broadcast", "✗".red());
            false
        }
    }
}

async fn validate_invalid_join(server: &str) -> bool {
    let Some(ws_stream) = connect(server).await else {
        return false;
    };
    let (mut write, mut read) = ws_stream.split();
    let _ = write.send(frame("proctor-join", json!({}))).await;

    match wait_for(&mut read, "proctor-join-ack", 3).await {
        Some(ack) if ack["data"]["success"] == false => {
            println!("{} Rejected as expected: {}", "✓".green(), ack["data"]["error"]);
            true
        }
        Some(_) => {
            println!("{} Join without exam id was accepted", "✗".red());
            false
        }
        None => {
            println!("{} No acknowledgment received", "✗".red());
            false
        }
    }
}

async fn validate_disconnect(server: &str) -> bool {
    let exam_id = unique_id("validate-exam");
    let Some((_proctor_write, mut proctor_read)) = joined_proctor(server, &exam_id).await else {
        return false;
    };

    let Some(student) = connect(server).await else {
        return false;
    };
    let (mut student_write, mut student_read) = student.split();
    let _ = student_write
        .send(frame("student-join", json!({ "examId": exam_id, "studentId": "leaving-student" })))
        .await;
    if wait_for(&mut student_read, "student-join-ack", 3).await.is_none() {
        println!("{} Student join failed", "✗".red());
        return false;
    }

    let _ = student_write.send(Message::Close(None)).await;

    match wait_for(&mut proctor_read, "student-disconnected", 3).await {
        Some(event) => {
            println!("{} Disconnect reason: {}", "✓".green(), event["data"]["reason"]);
            true
        }
        None => {
            println!("{} Proctor was not told about the disconnect", "✗".red());
            false
        }
    }
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    println!("{} Connected to server", "✓".green());

    let (mut write, mut read) = ws_stream.split();

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    loop {
        print!("{} ", "►".cyan());
        if io::stdout().flush().is_err() {
            break;
        }

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

        if let Ok(parsed) = serde_json::from_str::<Value>(input) {
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

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON messages directly to the server.\n");

    println!("{}", "Example Messages:".bold());
    println!("\n{}:", "Proctor Join".cyan());
    println!(r#"  {{"type":"proctor-join","data":{{"examId":"exam-1"}}}}"#);

    println!("\n{}:", "Student Join".cyan());
    println!(r#"  {{"type":"student-join","data":{{"examId":"exam-1","studentId":"student-1"}}}}"#);

    println!("\n{}:", "Student Heartbeat".cyan());
    println!(r#"  {{"type":"student-heartbeat","data":{{"examId":"exam-1","studentId":"student-1"}}}}"#);

    println!("\n{}:", "Verify ID".cyan());
    println!(r#"  {{"type":"request-id-verification","data":{{"examId":"exam-1","studentId":"student-1"}}}}"#);

    println!("\n{}:", "Report Incident".cyan());
    println!(r#"  {{"type":"report-suspicious-activity","data":{{"examId":"exam-1","studentId":"student-1","type":"looking_away"}}}}"#);

    println!("\n{}:", "Connection Status".cyan());
    println!(r#"  {{"type":"request-connection-status","data":{{"examId":"exam-1"}}}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
