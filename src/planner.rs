//! Natural-language query planner.
//!
//! Translates a query string into a structured [`SearchPlan`] and executes
//! it over hybrid search. The parser is rule-based and deterministic: prefix
//! patterns seed the intent, small extractors pull person names (matched
//! against the contacts table, cached per run), time phrases, and source
//! keywords; whatever remains becomes the lexical query text.
//!
//! Guarantees: every input produces a plan (worst case, a plain lexical
//! search over all sources); planning is pure and linear in the input; the
//! same input and reference instant always yield the same plan.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::embedding::EmbedClient;
use crate::error::QueryError;
use crate::models::{DocKind, SearchFilters, SearchHit, SearchMode, Source};
use crate::search::{self, SearchResponse};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Find,
    Question,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    None,
    Summarize,
    Count,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Entities {
    pub people: Vec<String>,
    pub orgs: Vec<String>,
    pub topics: Vec<String>,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPlan {
    pub intent: Intent,
    pub query_text: String,
    pub entities: Entities,
    #[serde(skip)]
    pub filters: SearchFilters,
    pub aggregation: Aggregation,
}

pub struct Planner {
    now: DateTime<Utc>,
    /// Contact display names, lowercased once for matching.
    contacts: Vec<(String, String)>,
}

impl Planner {
    pub fn new(now: DateTime<Utc>, contact_names: Vec<String>) -> Self {
        let contacts = contact_names
            .into_iter()
            .map(|name| {
                let lower = name.to_lowercase();
                (name, lower)
            })
            .collect();
        Self { now, contacts }
    }

    pub fn plan(&self, input: &str) -> SearchPlan {
        let mut tokens = tokenize(input);

        let intent = self.seed_intent(&mut tokens, input);
        let aggregation = self.extract_aggregation(&mut tokens);
        let sources = self.extract_sources(&mut tokens);
        let time_range = self.extract_time_range(&mut tokens);
        let people = self.extract_people(&mut tokens);
        let (orgs, locations) = self.extract_orgs_and_locations(&mut tokens);

        let mut kinds: Vec<DocKind> = Vec::new();
        for source in &sources {
            if let Some(kind) = kind_for_source(*source) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }

        let topics: Vec<String> = tokens
            .iter()
            .filter(|t| !t.consumed && !is_stopword(&t.lower))
            .map(|t| t.original.clone())
            .collect();

        let mut query_text = topics.join(" ");
        if query_text.is_empty() {
            if !people.is_empty() {
                query_text = people.join(" ");
            } else {
                query_text = input.trim().to_string();
            }
        }

        SearchPlan {
            intent,
            query_text,
            entities: Entities {
                people: people.clone(),
                orgs,
                topics,
                locations,
            },
            filters: SearchFilters {
                sources,
                kinds,
                time_range,
                participants: expand_participants(&people),
            },
            aggregation,
        }
    }

    fn seed_intent(&self, tokens: &mut [Token], input: &str) -> Intent {
        const FIND_PREFIXES: &[&[&str]] = &[
            &["show", "me"],
            &["show"],
            &["find"],
            &["search", "for"],
            &["search"],
            &["list"],
            &["get"],
        ];
        const QUESTION_WORDS: &[&str] = &[
            "who", "what", "when", "where", "why", "how", "which", "did", "do", "does", "is",
            "are", "was", "were",
        ];
        const COMMAND_WORDS: &[&str] = &["summarize", "count"];

        if let Some(first) = tokens.first() {
            if COMMAND_WORDS.contains(&first.lower.as_str()) {
                return Intent::Command;
            }
            // Contractions like "when's" tokenize to "when" + "s".
            if QUESTION_WORDS.contains(&first.lower.as_str()) {
                return Intent::Question;
            }
        }

        for prefix in FIND_PREFIXES {
            if prefix.len() <= tokens.len()
                && prefix
                    .iter()
                    .zip(tokens.iter())
                    .all(|(p, t)| *p == t.lower)
            {
                for token in tokens.iter_mut().take(prefix.len()) {
                    token.consumed = true;
                }
                return Intent::Find;
            }
        }

        if input.trim_end().ends_with('?') {
            return Intent::Question;
        }

        Intent::Find
    }

    fn extract_aggregation(&self, tokens: &mut [Token]) -> Aggregation {
        for i in 0..tokens.len() {
            if tokens[i].lower == "summarize" {
                tokens[i].consumed = true;
                return Aggregation::Summarize;
            }
            if tokens[i].lower == "count" {
                tokens[i].consumed = true;
                return Aggregation::Count;
            }
            if tokens[i].lower == "how"
                && tokens.get(i + 1).is_some_and(|t| t.lower == "many")
            {
                tokens[i].consumed = true;
                tokens[i + 1].consumed = true;
                return Aggregation::Count;
            }
        }
        Aggregation::None
    }

    fn extract_sources(&self, tokens: &mut [Token]) -> Vec<Source> {
        let mut sources = Vec::new();
        for token in tokens.iter_mut() {
            if token.consumed {
                continue;
            }
            let source = match token.lower.as_str() {
                "email" | "emails" | "mail" | "inbox" => Some(Source::Mail),
                "text" | "texts" | "message" | "messages" | "imessage" | "sms" => {
                    Some(Source::Messages)
                }
                "meeting" | "meetings" | "event" | "events" | "appointment" | "appointments"
                | "calendar" => Some(Source::Calendar),
                "contact" | "contacts" => Some(Source::Contacts),
                "whatsapp" | "chat" | "chats" => Some(Source::Chat),
                "note" | "notes" => Some(Source::Notes),
                "reminder" | "reminders" => Some(Source::Reminders),
                _ => None,
            };
            if let Some(source) = source {
                token.consumed = true;
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }
        sources
    }

    fn extract_time_range(&self, tokens: &mut [Token]) -> Option<(i64, i64)> {
        let today = self.now.date_naive();
        let day = 86_400i64;
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();

        // Two-token phrases first so "last month" wins over a lone "last".
        for i in 0..tokens.len() {
            if tokens[i].consumed {
                continue;
            }
            let second = match tokens.get(i + 1) {
                Some(t) if !t.consumed => t.lower.clone(),
                _ => continue,
            };
            let range = match (tokens[i].lower.as_str(), second.as_str()) {
                ("this", "week") => {
                    let start = start_of_week(today);
                    Some((midnight(start), midnight(start) + 7 * day - 1))
                }
                ("last", "week") => {
                    let start = start_of_week(today);
                    Some((midnight(start) - 7 * day, midnight(start) - 1))
                }
                ("this", "month") => {
                    let start = today.with_day(1).unwrap();
                    Some((midnight(start), midnight(next_month(start)) - 1))
                }
                ("last", "month") => {
                    let this_start = today.with_day(1).unwrap();
                    let last_start = prev_month(this_start);
                    Some((midnight(last_start), midnight(this_start) - 1))
                }
                ("this", "year") => {
                    let start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
                    let end = NaiveDate::from_ymd_opt(today.year() + 1, 1, 1).unwrap();
                    Some((midnight(start), midnight(end) - 1))
                }
                ("last", "year") => {
                    let start = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).unwrap();
                    let end = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
                    Some((midnight(start), midnight(end) - 1))
                }
                _ => None,
            };
            if let Some(range) = range {
                tokens[i].consumed = true;
                tokens[i + 1].consumed = true;
                return Some(range);
            }
        }

        for token in tokens.iter_mut() {
            if token.consumed {
                continue;
            }
            let range = match token.lower.as_str() {
                "today" => Some((midnight(today), midnight(today) + day - 1)),
                "yesterday" => Some((midnight(today) - day, midnight(today) - 1)),
                _ => None,
            };
            if let Some(range) = range {
                token.consumed = true;
                return Some(range);
            }
        }

        None
    }

    fn extract_people(&self, tokens: &mut [Token]) -> Vec<String> {
        let mut people = Vec::new();

        // Contact names, longest match first so "Ana Torres" beats "Ana".
        let mut names: Vec<&(String, String)> = self.contacts.iter().collect();
        names.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.1.cmp(&b.1)));

        for (name, lower) in names {
            let name_tokens: Vec<&str> = lower.split_whitespace().collect();
            if name_tokens.is_empty() {
                continue;
            }
            let mut i = 0;
            while i + name_tokens.len() <= tokens.len() {
                let window = &tokens[i..i + name_tokens.len()];
                let matched = window
                    .iter()
                    .zip(name_tokens.iter())
                    .all(|(t, n)| !t.consumed && t.lower == *n);
                if matched {
                    for token in tokens[i..i + name_tokens.len()].iter_mut() {
                        token.consumed = true;
                    }
                    if !people.contains(name) {
                        people.push(name.clone());
                    }
                }
                i += 1;
            }
            // A first name alone also resolves to the contact.
            if !people.contains(name) && name_tokens.len() > 1 {
                for token in tokens.iter_mut() {
                    if !token.consumed && token.lower == name_tokens[0] {
                        token.consumed = true;
                        people.push(name.clone());
                        break;
                    }
                }
            }
        }

        // "from X" / "with X" / "to X" with a capitalized X not in contacts.
        // A preposition whose X already matched a contact is consumed too.
        for i in 0..tokens.len().saturating_sub(1) {
            if tokens[i].consumed {
                continue;
            }
            if matches!(tokens[i].lower.as_str(), "from" | "with" | "to") {
                if tokens[i + 1].consumed {
                    tokens[i].consumed = true;
                    continue;
                }
                let next = &tokens[i + 1];
                if is_capitalized(&next.original) {
                    let name = next.original.clone();
                    tokens[i].consumed = true;
                    tokens[i + 1].consumed = true;
                    if !people.contains(&name) {
                        people.push(name);
                    }
                }
            }
        }

        people
    }

    fn extract_orgs_and_locations(&self, tokens: &mut [Token]) -> (Vec<String>, Vec<String>) {
        let mut orgs = Vec::new();
        let mut locations = Vec::new();

        for i in 0..tokens.len().saturating_sub(1) {
            if tokens[i].consumed || tokens[i + 1].consumed {
                continue;
            }
            if !is_capitalized(&tokens[i + 1].original) {
                continue;
            }
            match tokens[i].lower.as_str() {
                "at" => {
                    tokens[i].consumed = true;
                    tokens[i + 1].consumed = true;
                    orgs.push(tokens[i + 1].original.clone());
                }
                "in" => {
                    tokens[i].consumed = true;
                    tokens[i + 1].consumed = true;
                    locations.push(tokens[i + 1].original.clone());
                }
                _ => {}
            }
        }

        (orgs, locations)
    }
}

/// Plan and hits for one natural-language query.
#[derive(Debug, Clone, Serialize)]
pub struct NlQueryResult {
    pub plan: SearchPlan,
    pub hits: Vec<SearchHit>,
    pub mode: SearchMode,
}

/// Execute a plan over hybrid search. Person + topic queries fan out into
/// two searches (one per phrase) whose normalized fused scores are summed
/// and deduplicated by document.
pub async fn execute_plan(
    store: &Store,
    embedder: &EmbedClient,
    config: &Config,
    plan: &SearchPlan,
    limit: usize,
) -> Result<(Vec<SearchHit>, SearchMode), QueryError> {
    let limit = limit.max(1);
    let has_person = !plan.entities.people.is_empty();
    let has_topic = !plan.entities.topics.is_empty();

    if has_person && has_topic {
        let person_query = plan.entities.people.join(" ");
        let topic_query = plan.entities.topics.join(" ");

        let person_resp = search::hybrid_search(
            store,
            embedder,
            config,
            &person_query,
            &plan.filters,
            limit,
        )
        .await?;
        let topic_resp = search::hybrid_search(
            store,
            embedder,
            config,
            &topic_query,
            &plan.filters,
            limit,
        )
        .await?;

        let mode = if person_resp.mode == SearchMode::Normal
            && topic_resp.mode == SearchMode::Normal
        {
            SearchMode::Normal
        } else {
            SearchMode::LexicalOnly
        };

        return Ok((merge_responses(person_resp, topic_resp, limit), mode));
    }

    let response =
        search::hybrid_search(store, embedder, config, &plan.query_text, &plan.filters, limit)
            .await?;
    Ok((response.hits, response.mode))
}

/// Sum normalized fused scores across the two result lists, dedup by doc.
fn merge_responses(a: SearchResponse, b: SearchResponse, limit: usize) -> Vec<SearchHit> {
    let mut merged: HashMap<String, SearchHit> = HashMap::new();

    for (response, weight) in [(a, 1.0f64), (b, 1.0f64)] {
        let max = response
            .hits
            .iter()
            .map(|h| h.score)
            .fold(0.0f64, f64::max);
        if max <= 0.0 {
            continue;
        }
        for hit in response.hits {
            let normalized = weight * hit.score / max;
            merged
                .entry(hit.doc_id.clone())
                .and_modify(|existing| {
                    existing.score += normalized;
                    existing.bm25 = existing.bm25.max(hit.bm25);
                    existing.cosine = existing.cosine.max(hit.cosine);
                })
                .or_insert_with(|| SearchHit {
                    score: normalized,
                    ..hit
                });
        }
    }

    let mut hits: Vec<SearchHit> = merged.into_values().collect();
    hits.sort_by(|x, y| {
        y.score
            .partial_cmp(&x.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(y.updated_at.cmp(&x.updated_at))
            .then(x.doc_id.cmp(&y.doc_id))
    });
    hits.truncate(limit);
    hits
}

// ============ Tokenization ============

#[derive(Debug, Clone)]
struct Token {
    original: String,
    lower: String,
    consumed: bool,
}

fn tokenize(input: &str) -> Vec<Token> {
    input
        .split(|c: char| !c.is_alphanumeric() && c != '@' && c != '+' && c != '.')
        .filter(|t| !t.is_empty())
        .map(|t| {
            let trimmed = t.trim_matches('.');
            let token = if trimmed.is_empty() { t } else { trimmed };
            Token {
                original: token.to_string(),
                lower: token.to_lowercase(),
                consumed: false,
            }
        })
        .collect()
}

/// Full names plus their individual tokens, so a participant filter for
/// "Ana Torres" also matches side-channel spellings like `ana@example.com`.
fn expand_participants(people: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in people {
        if !out.contains(name) {
            out.push(name.clone());
        }
        for part in name.split_whitespace() {
            let part = part.to_string();
            if part.len() > 2 && !out.contains(&part) {
                out.push(part);
            }
        }
    }
    out
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "a" | "an" | "the" | "my" | "me" | "i" | "s" | "of" | "about" | "on" | "for" | "and"
            | "or" | "next" | "any" | "all" | "please"
    )
}

fn kind_for_source(source: Source) -> Option<DocKind> {
    match source {
        Source::Mail => Some(DocKind::Email),
        Source::Messages | Source::Chat => Some(DocKind::Message),
        Source::Calendar => Some(DocKind::Event),
        Source::Contacts => Some(DocKind::Contact),
        Source::Notes => Some(DocKind::Note),
        Source::Reminders => Some(DocKind::Reminder),
        Source::Files => Some(DocKind::File),
    }
}

fn start_of_week(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    date - chrono::Duration::days(weekday)
}

fn next_month(first_of_month: NaiveDate) -> NaiveDate {
    if first_of_month.month() == 12 {
        NaiveDate::from_ymd_opt(first_of_month.year() + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(first_of_month.year(), first_of_month.month() + 1, 1).unwrap()
    }
}

fn prev_month(first_of_month: NaiveDate) -> NaiveDate {
    if first_of_month.month() == 1 {
        NaiveDate::from_ymd_opt(first_of_month.year() - 1, 12, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(first_of_month.year(), first_of_month.month() - 1, 1).unwrap()
    }
}
