use std::time::Duration;

use chrono::SecondsFormat;
use dqmirror_core::query::{
    ClusterResponse, GraphResponse, LogsResponse, RunView, StoreStatus, TimelineResponse,
};
use owo_colors::OwoColorize;

pub fn print_run_human(v: &RunView) {
    let prev = v.prev.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
    let next = v.next.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
    match &v.snapshot.globals {
        Some(g) => println!(
            "RUN {} cmssw={} run_key={} prev={prev} next={next}",
            v.run, g.cmssw_version, g.run_key
        ),
        None => println!("RUN {} (no clients) prev={prev} next={next}", v.run),
    }
    for c in &v.snapshot.clients {
        let age = Duration::from_secs(c.elapsed_secs.max(0.0) as u64);
        println!(
            "{} {} {} lumi={} events={} rate={} rss={} age={} id={}",
            c.client.cyan(),
            c.host,
            exit_label(c.exit_code),
            opt(c.lumi),
            opt(c.events_total),
            c.events_rate.map(|r| format!("{r:.2}")).unwrap_or_else(|| "-".to_string()),
            c.vmrss,
            humantime::format_duration(age),
            c.id
        );
    }
    println!("-- {} clients --", v.snapshot.clients.len());
}

pub fn print_runs_human(v: &TimelineResponse) {
    for (run, item) in &v.runs {
        println!(
            "RUN {run} cmssw_run={} cmssw={} run_key={}",
            opt(item.run_data.cmssw_run),
            item.run_data.cmssw_version,
            item.run_data.run_key
        );
        for (client, details) in &item.clients {
            for d in details {
                println!(
                    "  {} {} {} {} lumi={} events={} {}",
                    d.timestamp,
                    client.cyan(),
                    d.host,
                    exit_label(d.exit_code),
                    opt(d.lumi),
                    opt(d.events_total),
                    d.state
                );
            }
        }
    }
    println!("-- {} runs --", v.runs.len());
}

pub fn print_graph_human(v: &GraphResponse) {
    let Some(graph) = &v.graph else {
        println!("no graph data");
        return;
    };
    println!(
        "GRAPH run={} host={} rev={} global_start={} updated={}",
        graph.run,
        graph.hostname,
        graph.rev,
        graph.global_start.to_rfc3339_opts(SecondsFormat::Millis, true),
        graph.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    for (stream, data) in &graph.streams {
        let lumis = data
            .get("lumis")
            .and_then(|l| l.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        println!("  {} lumis={lumis}", stream.cyan());
    }
}

pub fn print_clients_human(v: &[String]) {
    for client in v {
        println!("{client}");
    }
    println!("-- {} clients --", v.len());
}

pub fn print_info_human(v: &StoreStatus) {
    println!("db_path={}", v.db_path);
    println!("db_size_bytes={}", v.db_size_bytes);
    println!(
        "runs={} graphs={} hosts={} host_statuses={}",
        v.runs_count, v.graphs_count, v.hostnames_count, v.host_status_count
    );
    match v.bounds {
        Some(b) => println!("min_run={} max_run={}", b.min, b.max),
        None => println!("min_run=-1 max_run=-1"),
    }
    if let Some(newest) = v.newest_run_ts {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

pub fn print_logs_human(v: &LogsResponse) {
    match (&v.stdlog_start, &v.stdlog_end) {
        (None, None) => println!("no logs for {}", v.id),
        (start, end) => {
            println!("{}", start.as_deref().unwrap_or_default());
            println!(" ... ");
            println!("{}", end.as_deref().unwrap_or_default());
        }
    }
}

pub fn print_cluster_human(v: &ClusterResponse) {
    for host in &v.hosts {
        let state = if host.up {
            "UP".green().to_string()
        } else {
            "DOWN".red().to_string()
        };
        println!("{} {} {} {}", host.updated_at, host.host, state, host.message);
    }
    println!("-- {} hosts --", v.hosts.len());
}

fn exit_label(code: Option<i64>) -> String {
    match code {
        Some(0) => "ok".green().to_string(),
        Some(-1) => "running".yellow().to_string(),
        Some(c) => format!("exit={c}").red().to_string(),
        None => "exit=?".red().to_string(),
    }
}

fn opt(v: Option<i64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
