//! Plan, check report and run summary rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::config::UpgradeConfig;
use crate::upgrade::{CheckReport, LayerCheck, UpgradeResult};
use crate::wait::format_duration;

/// Row for the per-layer version table.
#[derive(Tabled)]
struct LayerRow {
    #[tabled(rename = "LAYER")]
    layer: String,
    #[tabled(rename = "CURRENT")]
    current: String,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "RELEASED")]
    released: String,
    #[tabled(rename = "NODES")]
    nodes: String,
    #[tabled(rename = "ACTION")]
    action: String,
}

/// Row for the per-node outcome table.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

/// Print what a run is about to do, before asking for confirmation.
pub fn print_upgrade_plan(upgrade: &UpgradeConfig, context_name: &str) {
    println!();
    println!("{} (context: {}):", "Upgrade Plan".bold(), context_name);
    println!(
        "  Talos       {}  order: {}",
        upgrade.talos.version.cyan(),
        upgrade.talos.order
    );
    println!("              image: {}", upgrade.talos.image_ref().dimmed());
    println!(
        "  Kubernetes  {}  order: {}",
        upgrade.kubernetes.version.cyan(),
        upgrade.kubernetes.order
    );
    println!();
}

/// Print the check-only report.
pub fn print_check_report(report: &CheckReport, context_name: &str) {
    println!();
    println!(
        "{} (context: {}, {} nodes):",
        "Upgrade Check".bold(),
        context_name,
        report.node_count
    );

    let rows = vec![layer_row(&report.talos), layer_row(&report.kubernetes)];
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{}", table);

    for check in [&report.talos, &report.kubernetes] {
        if let Some(reason) = &check.compare_error {
            println!(
                "  {} {}: cannot compare current version: {}",
                "✗".red(),
                check.layer,
                reason
            );
        }
        if let Some(reason) = &check.gate_error {
            println!("  {} {}: {}", "⚠".yellow(), check.layer, reason);
        }
    }

    if !report.prerequisite_issues.is_empty() {
        println!();
        println!("{}", "Prerequisites not met:".red().bold());
        for issue in &report.prerequisite_issues {
            println!("  {} {}", "✗".red(), issue);
        }
    }

    println!();
    if report.is_up_to_date() {
        println!("  {} Cluster is already at the target versions", "✓".green());
    } else if report.talos.would_upgrade() || report.kubernetes.would_upgrade() {
        println!("  Run without --check-only to apply the upgrade");
    }
}

/// Print the outcome of a run.
pub fn print_upgrade_result(result: &UpgradeResult) {
    println!();
    println!("{}", "Upgrade Summary:".bold());
    println!("{}", "-".repeat(40));
    println!("  Talos upgraded:      {}", yes_no(result.talos_upgraded));
    println!("  Kubernetes upgraded: {}", yes_no(result.kubernetes_upgraded));
    println!(
        "  Started:             {}",
        result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Duration:            {}", format_duration(result.duration));

    let rows = node_rows(result);
    if !rows.is_empty() {
        println!();
        let mut table = Table::new(&rows);
        apply_table_style(&mut table);
        println!("{}", table);
        println!("  Success rate: {:.1}%", result.success_rate() * 100.0);
    }

    for skipped in &result.skipped_layers {
        println!(
            "  {} {} skipped: {}",
            "⚠".yellow(),
            skipped.layer,
            skipped.reason
        );
    }

    if result.has_errors() {
        println!();
        println!("{} ({}):", "Errors".red().bold(), result.errors.len());
        for e in &result.errors {
            println!("  {} {}", "✗".red(), e);
        }
        if result.rollback_required {
            println!();
            println!(
                "  {} Rollback may be required for: {}",
                "⚠".yellow(),
                result.failed_nodes.join(", ")
            );
        }
    } else {
        println!();
        println!("  {} {}", "✓".green(), result);
    }
}

fn layer_row(check: &LayerCheck) -> LayerRow {
    let action = if check.compare_error.is_some() {
        "unknown"
    } else if !check.needs_upgrade {
        "up-to-date"
    } else if check.version_available {
        "upgrade"
    } else {
        "blocked"
    };

    LayerRow {
        layer: check.layer.to_string(),
        current: display_or_dash(&check.current),
        target: check.target.clone(),
        released: yes_no(check.version_available),
        nodes: if check.nodes_needing_upgrade.is_empty() {
            "-".to_string()
        } else {
            check.nodes_needing_upgrade.join(",")
        },
        action: action.to_string(),
    }
}

fn node_rows(result: &UpgradeResult) -> Vec<NodeRow> {
    let upgraded = result.upgraded_nodes.iter().map(|n| NodeRow {
        node: n.clone(),
        status: "upgraded".to_string(),
    });
    let failed = result.failed_nodes.iter().map(|n| NodeRow {
        node: n.clone(),
        status: "failed".to_string(),
    });
    upgraded.chain(failed).collect()
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

fn display_or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// Apply kubectl-style table formatting: no borders, no separators, 2-space column gap.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Layer;
    use crate::error::TkupError;

    fn check(needs_upgrade: bool, version_available: bool) -> LayerCheck {
        LayerCheck {
            layer: Layer::Talos,
            current: "v1.10.4".to_string(),
            target: "v1.10.5".to_string(),
            needs_upgrade,
            version_available,
            available_versions: vec!["v1.10.5".to_string()],
            gate_error: None,
            compare_error: None,
            nodes_needing_upgrade: vec!["cp-1".to_string(), "worker-1".to_string()],
        }
    }

    #[test]
    fn test_layer_row_action() {
        assert_eq!(layer_row(&check(true, true)).action, "upgrade");
        assert_eq!(layer_row(&check(true, false)).action, "blocked");
        assert_eq!(layer_row(&check(false, true)).action, "up-to-date");

        let mut unparsable = check(false, true);
        unparsable.compare_error = Some("Invalid version format: garbage".to_string());
        assert_eq!(layer_row(&unparsable).action, "unknown");
    }

    #[test]
    fn test_layer_row_fields() {
        let mut c = check(true, true);
        c.current = String::new();
        let row = layer_row(&c);
        assert_eq!(row.layer, "Talos");
        assert_eq!(row.current, "-");
        assert_eq!(row.released, "yes");
        assert_eq!(row.nodes, "cp-1,worker-1");
    }

    #[test]
    fn test_node_rows_lists_upgraded_then_failed() {
        let mut result = UpgradeResult::new();
        result.record_success("worker-1");
        result.record_failure(
            "cp-1",
            TkupError::UpgradeFailed {
                node: "cp-1".to_string(),
                details: "boom".to_string(),
            },
        );

        let rows = node_rows(&result);
        let rendered: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.node.as_str(), r.status.as_str()))
            .collect();
        assert_eq!(rendered, vec![("worker-1", "upgraded"), ("cp-1", "failed")]);
    }

    #[test]
    fn test_table_has_no_borders() {
        let rows = vec![layer_row(&check(true, true))];
        let mut table = Table::new(&rows);
        apply_table_style(&mut table);
        let rendered = table.to_string();

        assert!(rendered.starts_with("LAYER"));
        assert!(!rendered.contains('|'));
        assert!(rendered.contains("v1.10.5"));
    }
}
