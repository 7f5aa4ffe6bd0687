use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

static CNPJ_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}").expect("valid CNPJ regex"));

/// Containers the search engine uses for individual hits.
static RESULT_BLOCKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.tF2Cxc, div.g, div.MjjYud").expect("valid selector"));

static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

pub const BASE_SCORE: u32 = 10;
pub const NICKNAME_BONUS: u32 = 5;
pub const CITY_BONUS: u32 = 2;

/// Lowercased ASCII letters and digits only.
pub fn comparable(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase()
}

/// Score of a block that already holds at least one CNPJ.
///
/// `block_text` must be lowercased; `nickname` must come from [`comparable`].
pub fn score_block(block_text: &str, nickname: &str, city: &str) -> u32 {
    let mut score = BASE_SCORE;
    if comparable(block_text).contains(nickname) {
        score += NICKNAME_BONUS;
    }
    if block_text.contains(&city.to_lowercase()) {
        score += CITY_BONUS;
    }
    score
}

fn block_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Picks the first CNPJ of the highest scoring result block.
///
/// Falls back to the whole `<body>` when no result container matches.
/// Ties keep the earlier block.
pub fn find_best_cnpj(html: &str, nickname: &str, city: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let mut blocks: Vec<ElementRef<'_>> = document.select(&RESULT_BLOCKS).collect();
    if blocks.is_empty() {
        debug!("No result containers found, scanning the whole page");
        blocks = document.select(&BODY).take(1).collect();
        if blocks.is_empty() {
            blocks.push(document.root_element());
        }
    }

    info!("Analysing {} result blocks", blocks.len());

    let nickname = comparable(nickname);
    let mut best: Option<(u32, String)> = None;

    for block in blocks {
        let text = block_text(block);
        let Some(first) = CNPJ_PATTERN.find(&text) else {
            continue;
        };

        let score = score_block(&text, &nickname, city);
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, first.as_str().to_string()));
        }
    }

    best.map(|(_, cnpj)| cnpj)
}
