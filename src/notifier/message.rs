use std::fmt;
use std::str::FromStr;

use crate::domain::Crossing;
use crate::window::ReportingWindow;

const HEADER: &str = "📌 *ALERTA (CERCA)* 📌";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    #[default]
    Batch,
    PerItem,
}

impl FromStr for NotifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "per_item" | "per-item" | "single" => Ok(Self::PerItem),
            other => Err(format!("unknown notify mode: {other}")),
        }
    }
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::PerItem => write!(f, "per_item"),
        }
    }
}

/// Text block for one crossing. The quantity shown is the recorded multiple.
pub fn render_block(crossing: &Crossing) -> String {
    let snapshot = &crossing.snapshot;
    [
        format!("[{}]", snapshot.account),
        format!("- Armário: {}", snapshot.cabinet.as_deref().unwrap_or("-")),
        format!("- Condomínio: {}", snapshot.condominium.as_deref().unwrap_or("-")),
        format!("- Quantidade: {}", crossing.multiple),
        format!("- Zona: {}", snapshot.zone),
    ]
    .join("\n")
}

fn compose(window: &ReportingWindow, blocks: &[String]) -> String {
    format!(
        "{HEADER}\n\nPeríodo: {}\n\n{}",
        window.label(),
        blocks.join("\n\n")
    )
}

/// Messages to send for a run; empty when nothing crossed.
pub fn render_messages(
    crossings: &[Crossing],
    window: &ReportingWindow,
    mode: NotifyMode,
) -> Vec<String> {
    if crossings.is_empty() {
        return Vec::new();
    }

    let blocks: Vec<String> = crossings.iter().map(render_block).collect();
    match mode {
        NotifyMode::Batch => vec![compose(window, &blocks)],
        NotifyMode::PerItem => blocks
            .into_iter()
            .map(|block| compose(window, &[block]))
            .collect(),
    }
}
