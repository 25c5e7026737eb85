//! End-of-run report

use crate::metrics::aggregate::FleetMetrics;
use crate::metrics::terminal::TerminalMetrics;

use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

impl FleetMetrics {
    /// Print the run summary to stdout
    pub async fn print_report(&self, run_duration: Duration, connected_at_shutdown: usize) {
        let terminal_metrics = self.get_terminal_metrics().await;
        let availability = self.availability(run_duration).await;

        let attempts = self.total_connect_attempts.load(Ordering::Relaxed);
        let failures = self.total_connect_failures.load(Ordering::Relaxed);
        let connections = self.total_connections.load(Ordering::Relaxed);
        let disconnects = self.total_disconnects.load(Ordering::Relaxed);
        let auth_rejections = self.total_auth_rejections.load(Ordering::Relaxed);
        let failed = self.total_failed_supervisors.load(Ordering::Relaxed);

        println!("\nTerminal Harness Summary");
        println!("===============================================================");
        println!("   Run Duration:       {:.2}s", run_duration.as_secs_f64());
        println!("   Terminals:          {}", terminal_metrics.len());
        println!("   Connected at stop:  {}", connected_at_shutdown);
        println!("   Availability:       {:.2}%", availability);

        println!("\nConnections:");
        println!("   Connect Attempts:   {}", attempts);
        println!("   Connect Failures:   {}", failures);
        println!("   Sessions Opened:    {}", connections);
        println!("   Dropped Sessions:   {}", disconnects);
        if auth_rejections > 0 {
            println!("   Auth Rejections:    {}", auth_rejections);
        }
        if failed > 0 {
            println!("   Failed Terminals:   {}", failed);
        }

        self.print_traffic();
        print_terminal_breakdown(&terminal_metrics);
        println!("===============================================================");
    }

    fn print_traffic(&self) {
        let probes = self.total_probes_sent.load(Ordering::Relaxed);
        let probes_failed = self.total_probes_failed.load(Ordering::Relaxed);
        let events = self.total_server_events.load(Ordering::Relaxed);
        let heartbeats = self.total_heartbeats.load(Ordering::Relaxed);

        if probes > 0 || events > 0 || heartbeats > 0 {
            println!("\nTraffic:");
            println!("   Keep-alives Sent:   {}", probes);
            if probes_failed > 0 {
                println!("   Keep-alives Failed: {}", probes_failed);
            }
            println!("   Server Events:      {}", events);
            println!("   Heartbeats:         {}", heartbeats);
        }
    }
}

fn print_terminal_breakdown(terminal_metrics: &[TerminalMetrics]) {
    let now = Instant::now();
    let troubled: Vec<_> = terminal_metrics.iter().filter(|m| m.had_trouble()).collect();

    if terminal_metrics.len() <= 10 {
        println!("\nPer-Terminal Breakdown:");
        for m in terminal_metrics {
            println!(
                "   [{}] {}: {} sessions, {} drops, {} failed connects, up {:.1}s{}",
                m.terminal,
                m.id,
                m.connections,
                m.disconnects,
                m.connect_failures,
                m.uptime(now).as_secs_f64(),
                if m.failed { " (FAILED)" } else { "" }
            );
        }
    } else if !troubled.is_empty() {
        println!(
            "\nTerminal Summary ({} of {} had connection trouble):",
            troubled.len(),
            terminal_metrics.len()
        );

        let mut sorted = troubled.clone();
        sorted.sort_by(|a, b| {
            (b.disconnects + b.connect_failures).cmp(&(a.disconnects + a.connect_failures))
        });
        for m in sorted.iter().take(5) {
            println!(
                "   [{}] {}: {} drops, {} failed connects, keep-alive success {:.1}%{}",
                m.terminal,
                m.id,
                m.disconnects,
                m.connect_failures,
                m.probe_success_rate(),
                if m.failed { " (FAILED)" } else { "" }
            );
        }
    }
}
