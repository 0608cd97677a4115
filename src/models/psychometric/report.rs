//! Formatted report tables for fitted psychometric models.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};

use super::diagnostics::ConvergenceSummary;
use super::posterior::{ParameterSummary, PosteriorSummary};

/// Split-R-hat above this level is flagged in the convergence table.
const RHAT_WARN: f64 = 1.01;

/// Rendered tables for a fit report.
#[derive(Debug, Clone)]
pub struct FitTables {
    pub hyperparameters: String,
    pub blocks: String,
    pub convergence: Option<String>,
}

/// Render posterior and convergence summaries to formatted tables using `comfy_table`.
///
/// The hyperparameter table reports the standardized-space hierarchy; the
/// block table reports each block in original intensity units as
/// `mean [q2.5, q97.5]` cells.
#[must_use]
pub fn render_fit_tables(
    posterior: &PosteriorSummary,
    convergence: Option<&ConvergenceSummary>,
) -> FitTables {
    let mut hyper_table = make_table(&["parameter", "mean", "sd", "q2.5", "median", "q97.5"]);
    for (name, summary) in hyper_rows(posterior) {
        hyper_table.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{:.4}", summary.mean)),
            Cell::new(format!("{:.4}", summary.std_dev)),
            Cell::new(format!("{:.4}", summary.q025)),
            Cell::new(format!("{:.4}", summary.q50)),
            Cell::new(format!("{:.4}", summary.q975)),
        ]);
    }

    let mut block_table = make_table(&[
        "block",
        "threshold",
        "intercept",
        "slope",
        "gamma",
        "lambda",
    ]);
    for (i, label) in posterior.block_labels.iter().enumerate() {
        block_table.add_row(vec![
            Cell::new(label.to_string()),
            interval_cell(&posterior.threshold[i]),
            interval_cell(&posterior.intercept[i]),
            interval_cell(&posterior.slope[i]),
            interval_cell(&posterior.gamma[i]),
            interval_cell(&posterior.lambda[i]),
        ]);
    }

    FitTables {
        hyperparameters: hyper_table.to_string(),
        blocks: block_table.to_string(),
        convergence: convergence.map(render_convergence),
    }
}

fn render_convergence(summary: &ConvergenceSummary) -> String {
    let mut parameter_table = make_table(&["parameter", "split_rhat", "ess"]);
    for row in &summary.parameters {
        parameter_table.add_row(vec![
            Cell::new(&row.name),
            rhat_cell(row.split_rhat),
            Cell::new(format!("{:.1}", row.ess)),
        ]);
    }

    let mut sampler_table = make_table(&[
        "chains",
        "draws_used",
        "divergences",
        "mean_accept",
        "max_depth_hits",
    ]);
    sampler_table.add_row(vec![
        Cell::new(summary.chain_count.to_string()),
        Cell::new(summary.draws_per_chain_used.to_string()),
        count_cell(summary.total_divergences),
        Cell::new(format!("{:.3}", summary.mean_accept_prob)),
        count_cell(summary.max_treedepth_hits),
    ]);

    format!("{parameter_table}\n{sampler_table}")
}

fn hyper_rows(posterior: &PosteriorSummary) -> Vec<(&'static str, ParameterSummary)> {
    let mut rows = vec![
        ("mu_intercept", posterior.mu_intercept),
        ("sigma_intercept", posterior.sigma_intercept),
        ("mu_slope", posterior.mu_slope),
        ("sigma_slope", posterior.sigma_slope),
        ("mu_gamma", posterior.mu_gamma),
        ("kappa_gamma", posterior.kappa_gamma),
        ("mu_lambda", posterior.mu_lambda),
        ("kappa_lambda", posterior.kappa_lambda),
    ];
    if let Some(kappa_obs) = posterior.kappa_obs {
        rows.push(("kappa_obs", kappa_obs));
    }
    rows
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn interval_cell(summary: &ParameterSummary) -> Cell {
    Cell::new(format!(
        "{:.4} [{:.4}, {:.4}]",
        summary.mean, summary.q025, summary.q975
    ))
}

fn rhat_cell(value: f64) -> Cell {
    let cell = Cell::new(format!("{value:.3}"));
    if value > RHAT_WARN {
        cell.fg(Color::Red).add_attribute(Attribute::Bold)
    } else {
        cell
    }
}

fn count_cell(count: usize) -> Cell {
    let cell = Cell::new(count.to_string());
    if count > 0 {
        cell.fg(Color::Red).add_attribute(Attribute::Bold)
    } else {
        cell
    }
}
