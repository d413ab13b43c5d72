use eyre::{Result, eyre};
use log::{debug, trace};
use scraper::{ElementRef, Html, Selector};

use crate::utils::config::ExtractorConfig;

const DATE_KEYWORDS: &[&str] = &[
    "posted", "today", "yesterday", "day", "week", "ago", "hour", "month",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub description: String,
    pub posted_date: Option<String>,
    pub strategy: String,
}

/// Text pulled out of one element, one entry per text node.
#[derive(Debug, Clone, Default)]
pub struct Block {
    fragments: Vec<String>,
}

impl Block {
    pub fn text(&self) -> String {
        self.fragments.join(" ")
    }

    /// Length in chars of the fragments that are not boilerplate.
    fn substantive_len(&self, boilerplate: &[String]) -> usize {
        self.fragments
            .iter()
            .filter(|f| {
                let lower = f.to_lowercase();
                !boilerplate.iter().any(|phrase| lower.contains(phrase.as_str()))
            })
            .map(|f| f.chars().count())
            .sum()
    }
}

pub enum Strategy {
    /// First element matching a CSS selector
    Css { source: String, selector: Selector },
    /// Container holding the most paragraph and list text
    LargestBlock { selector: Selector },
}

impl Strategy {
    pub fn css(source: &str) -> Result<Self> {
        Ok(Strategy::Css {
            source: source.to_string(),
            selector: parse_selector(source)?,
        })
    }

    pub fn largest_block() -> Result<Self> {
        Ok(Strategy::LargestBlock {
            selector: parse_selector("p, li")?,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Strategy::Css { source, .. } => source,
            Strategy::LargestBlock { .. } => "largest text block",
        }
    }

    pub fn apply(&self, document: &Html) -> Option<Block> {
        match self {
            Strategy::Css { selector, .. } => document
                .select(selector)
                .map(text_block)
                .find(|block| !block.fragments.is_empty()),
            Strategy::LargestBlock { selector } => largest_block(document, selector),
        }
    }
}

/// Runs an ordered chain of strategies over a rendered page and keeps the
/// first result long enough to be a real description.
pub struct Extractor {
    strategies: Vec<Strategy>,
    date_selectors: Vec<Selector>,
    min_chars: usize,
    boilerplate: Vec<String>,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let mut strategies = config
            .description_selectors
            .iter()
            .map(|s| Strategy::css(s))
            .collect::<Result<Vec<_>>>()?;
        if config.largest_block_fallback {
            strategies.push(Strategy::largest_block()?);
        }
        if strategies.is_empty() {
            return Err(eyre!("extractor has no strategies configured"));
        }

        let date_selectors = config
            .date_selectors
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            strategies,
            date_selectors,
            min_chars: config.min_description_chars,
            boilerplate: config
                .boilerplate_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        })
    }

    #[cfg(test)]
    pub fn with_strategies(strategies: Vec<Strategy>, min_chars: usize) -> Self {
        Self {
            strategies,
            date_selectors: Vec::new(),
            min_chars,
            boilerplate: Vec::new(),
        }
    }

    pub fn is_usable(&self, block: &Block) -> bool {
        block.substantive_len(&self.boilerplate) >= self.min_chars
    }

    /// `None` means no strategy produced a usable description, which is an
    /// ordinary outcome for expired or blocked listings.
    pub fn extract(&self, html: &str) -> Option<Extraction> {
        let document = Html::parse_document(html);

        let (strategy, block) = self.strategies.iter().find_map(|strategy| {
            let block = strategy.apply(&document)?;
            if self.is_usable(&block) {
                Some((strategy, block))
            } else {
                trace!(
                    "strategy {:?} matched but only {} substantive chars",
                    strategy.name(),
                    block.substantive_len(&self.boilerplate)
                );
                None
            }
        })?;

        let description = block.text();
        debug!(
            "found description with {:?} ({} chars)",
            strategy.name(),
            description.chars().count()
        );

        Some(Extraction {
            description,
            posted_date: self.posted_date(&document),
            strategy: strategy.name().to_string(),
        })
    }

    fn posted_date(&self, document: &Html) -> Option<String> {
        self.date_selectors.iter().find_map(|selector| {
            let text = document.select(selector).next().map(text_block)?.text();
            let lower = text.to_lowercase();
            DATE_KEYWORDS
                .iter()
                .any(|k| lower.contains(k))
                .then_some(text)
        })
    }
}

fn parse_selector(source: &str) -> Result<Selector> {
    Selector::parse(source).map_err(|e| eyre!("invalid selector {:?}: {}", source, e))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_block(element: ElementRef) -> Block {
    let fragments = element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let in_code = node
                .parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|p| matches!(p.value().name(), "script" | "style" | "noscript" | "template"));
            if in_code {
                return None;
            }
            let text = normalize(text);
            (!text.is_empty()).then_some(text)
        })
        .collect();

    Block { fragments }
}

fn container_of(element: ElementRef) -> Option<ElementRef> {
    let parent = element.parent().and_then(ElementRef::wrap)?;
    match parent.value().name() {
        "ul" | "ol" => parent.parent().and_then(ElementRef::wrap).or(Some(parent)),
        _ => Some(parent),
    }
}

fn largest_block(document: &Html, selector: &Selector) -> Option<Block> {
    // (container, score) in first-seen document order so ties are stable
    let mut scores: Vec<(ElementRef, usize)> = Vec::new();

    for element in document.select(selector) {
        let len: usize = text_block(element)
            .fragments
            .iter()
            .map(|f| f.chars().count())
            .sum();
        if len == 0 {
            continue;
        }
        let Some(container) = container_of(element) else {
            continue;
        };

        match scores.iter_mut().find(|(c, _)| c.id() == container.id()) {
            Some((_, score)) => *score += len,
            None => scores.push((container, len)),
        }
    }

    let mut best: Option<(ElementRef, usize)> = None;
    for (container, score) in scores {
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((container, score));
        }
    }

    best.map(|(container, _)| text_block(container))
}
