// Intent resolver
//
// Turns a question into a QueryIntent using fixed lexicons and fuzzy name
// matching against the registry's subject directory.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use strsim::{levenshtein, normalized_levenshtein};
use tracing::debug;

use super::dataset::{BALL_EVENTS, MATCHES};
use super::metric_catalogue::{opponent_column, subject_column};
use crate::config::ResolverConfig;
use crate::models::{
    Degradation, Granularity, IntentFilter, Literal, Metric, MetricRequest, MetricRole, Phase,
    PipelineError, QueryIntent, QueryType, Ranking, SchemaRegistry, SeasonScope, SortDirection,
    SubjectEntry, SubjectKind, SubjectRef,
};

/// Similarity given to structural partial matches (surname only, initials)
const PARTIAL_NAME_SIMILARITY: f64 = 0.9;
const MAX_NAME_TOKENS: usize = 4;

const METRIC_PHRASES: &[(&str, Metric)] = &[
    ("runs", Metric::Runs),
    ("scored", Metric::Runs),
    ("scorer", Metric::Runs),
    ("scorers", Metric::Runs),
    ("run-scorer", Metric::Runs),
    ("run-scorers", Metric::Runs),
    ("run scorer", Metric::Runs),
    ("run scorers", Metric::Runs),
    ("run getters", Metric::Runs),
    ("balls faced", Metric::BallsFaced),
    ("balls played", Metric::BallsFaced),
    ("strike rate", Metric::StrikeRate),
    ("strike-rate", Metric::StrikeRate),
    ("sr", Metric::StrikeRate),
    ("average", Metric::Average),
    ("batting average", Metric::Average),
    ("fours", Metric::Fours),
    ("4s", Metric::Fours),
    ("sixes", Metric::Sixes),
    ("6s", Metric::Sixes),
    ("maximums", Metric::Sixes),
    ("boundaries", Metric::Boundaries),
    ("boundary percentage", Metric::BoundaryPct),
    ("boundary percent", Metric::BoundaryPct),
    ("boundary pct", Metric::BoundaryPct),
    ("boundary rate", Metric::BoundaryPct),
    ("dot percentage", Metric::DotPct),
    ("dot ball percentage", Metric::DotPct),
    ("dot pct", Metric::DotPct),
    ("wickets", Metric::Wickets),
    ("wicket", Metric::Wickets),
    ("dismissals", Metric::Wickets),
    ("scalps", Metric::Wickets),
    ("wicket-takers", Metric::Wickets),
    ("wicket takers", Metric::Wickets),
    ("wicket-taker", Metric::Wickets),
    ("balls bowled", Metric::BallsBowled),
    ("deliveries bowled", Metric::BallsBowled),
    ("runs conceded", Metric::RunsConceded),
    ("conceded", Metric::RunsConceded),
    ("economy", Metric::Economy),
    ("economy rate", Metric::Economy),
    ("economical", Metric::Economy),
    ("bowling average", Metric::BowlingAverage),
    ("bowling strike rate", Metric::BowlingStrikeRate),
    ("dot balls", Metric::DotBalls),
    ("dot ball", Metric::DotBalls),
    ("dots", Metric::DotBalls),
    ("wins", Metric::Wins),
    ("won", Metric::Wins),
    ("win", Metric::Wins),
    ("victories", Metric::Wins),
    ("matches played", Metric::Matches),
    ("games played", Metric::Matches),
    ("appearances", Metric::Matches),
    ("win percentage", Metric::WinPct),
    ("win rate", Metric::WinPct),
    ("winning percentage", Metric::WinPct),
];

const PHASE_PHRASES: &[(&str, Phase)] = &[
    ("powerplay", Phase::Powerplay),
    ("powerplays", Phase::Powerplay),
    ("power play", Phase::Powerplay),
    ("power-play", Phase::Powerplay),
    ("first six overs", Phase::Powerplay),
    ("first 6 overs", Phase::Powerplay),
    ("middle overs", Phase::Middle),
    ("middle over", Phase::Middle),
    ("middle phase", Phase::Middle),
    ("middle", Phase::Middle),
    ("death", Phase::Death),
    ("death overs", Phase::Death),
    ("slog overs", Phase::Death),
    ("last five overs", Phase::Death),
    ("last 5 overs", Phase::Death),
];

const PER_MATCH_PHRASES: &[&str] = &[
    "per match",
    "each match",
    "every match",
    "match by match",
    "match-by-match",
    "match-wise",
    "by match",
    "per game",
    "per innings",
];

const PER_SEASON_PHRASES: &[&str] = &[
    "per season",
    "each season",
    "every season",
    "season by season",
    "season-by-season",
    "season-wise",
    "by season",
    "per year",
    "year by year",
    "each year",
    "trend",
    "over the years",
];

const FIRST_INNINGS_PHRASES: &[&str] = &["batting first", "first innings", "setting a target"];
const SECOND_INNINGS_PHRASES: &[&str] = &["chasing", "batting second", "second innings", "run chase"];
const HEAD_TO_HEAD_PHRASES: &[&str] = &["head to head", "head-to-head", "h2h"];
const CURRENT_SEASON_PHRASES: &[&str] = &["this season", "current season", "latest season", "last season"];

const LEADERBOARD_CUES: &[&str] = &[
    "top", "most", "best", "highest", "lowest", "fewest", "least", "leading", "leaderboard",
    "worst", "rank", "ranking", "rankings",
];
const OPPONENT_CUES: &[&str] = &["against", "vs", "vs.", "v", "versus"];
const BOWLING_CUES: &[&str] = &["bowling", "bowler", "bowlers", "bowled", "bowl", "spell"];
const TEAM_CUES: &[&str] = &["team", "teams", "side", "sides", "franchise", "franchises"];
const VENUE_CUES: &[&str] = &["at", "in", "venue"];
const GENERIC_VENUE_WORDS: &[&str] = &[
    "stadium", "ground", "cricket", "international", "association", "sports", "academy",
];

/// Words after which an unknown lowercase word is read as a name
const SUBJECT_CUES: &[&str] = &[
    "for", "by", "of", "did", "does", "has", "have", "about", "against", "vs", "vs.", "versus",
];

/// Function words that never start or end a name
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "for", "by", "at", "on", "and", "or", "with", "during",
    "between", "since", "to", "from", "vs", "vs.", "v", "versus", "against", "is", "was", "has",
    "have", "had", "did", "does", "do", "what", "who", "which", "how", "me", "his", "her",
    "their", "as",
];

/// Words that may be capitalised without naming a subject
const VOCABULARY: &[&str] = &[
    "show", "give", "list", "get", "find", "tell", "compare", "comparison", "stats",
    "statistics", "stat", "record", "records", "performance", "numbers", "figures", "overall",
    "career", "total", "season", "seasons", "year", "years", "ipl", "wpl", "t20", "t20s", "odi",
    "match", "matches", "game", "games", "batting", "bowling", "first", "second", "innings",
    "super", "over", "overs", "phase", "head", "per", "each", "every", "all", "time",
    "all-time", "many", "much", "please", "were", "are", "this", "last", "current", "latest",
    "when", "where", "why", "i", "we", "can", "could", "you", "rate", "percentage",
    "batter", "batters", "batsman", "batsmen", "bowler", "bowlers", "players", "which", "whats",
    "what's", "who's", "it", "its", "be", "been", "top", "most", "best", "highest", "lowest",
    "fewest", "least", "leading", "worst", "rank", "ranking", "middle", "death", "chasing",
    "league", "premier", "indian", "women's", "mens", "men's", "womens", "score", "scores",
    "take", "took", "taken", "hit", "hits", "make", "made", "play", "played", "plays", "name",
    "number", "count", "amount", "venue", "venues", "ground", "grounds", "city", "him", "them",
    "there", "so", "far", "ever", "yet", "now", "than",
];

/// Settings that shape resolution
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub similarity_threshold: f64,
    pub default_top_n: usize,
    pub min_leaderboard_balls: i64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            default_top_n: 10,
            min_leaderboard_balls: 60,
        }
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            default_top_n: config.default_top_n,
            min_leaderboard_balls: config.min_leaderboard_balls,
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    lower: String,
    capitalized: bool,
}

/// A resolved subject and the token span it came from
#[derive(Debug, Clone)]
struct Mention {
    start: usize,
    subject: SubjectRef,
    exact: bool,
}

struct Candidate<'r> {
    entry: &'r SubjectEntry,
    exact: bool,
    distance: usize,
    similarity: f64,
}

pub struct IntentResolver {
    settings: ResolverSettings,
    token_re: Regex,
    over_range_re: Regex,
    year_range_re: Regex,
    since_re: Regex,
    year_re: Regex,
    top_n_re: Regex,
    metric_phrases: Vec<(Vec<String>, Metric)>,
    vocabulary: HashSet<String>,
}

fn words(phrase: &str) -> Vec<String> {
    phrase.split_whitespace().map(str::to_string).collect()
}

fn phrase_at(tokens: &[Token], start: usize, phrase: &[String]) -> bool {
    start + phrase.len() <= tokens.len()
        && phrase
            .iter()
            .enumerate()
            .all(|(i, w)| tokens[start + i].lower == *w)
}

fn contains_phrase(tokens: &[Token], phrase: &str) -> bool {
    let phrase = words(phrase);
    (0..tokens.len()).any(|i| phrase_at(tokens, i, &phrase))
}

fn contains_any_phrase(tokens: &[Token], phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(tokens, p))
}

fn has_word(tokens: &[Token], set: &[&str]) -> bool {
    tokens.iter().any(|t| set.contains(&t.lower.as_str()))
}

/// Levenshtein similarity of the names with their words sorted
fn token_sort_similarity(a: &str, b: &str) -> f64 {
    let sort = |s: &str| {
        let mut parts: Vec<&str> = s.split_whitespace().collect();
        parts.sort_unstable();
        parts.join(" ")
    };
    normalized_levenshtein(&sort(a), &sort(b))
}

/// "S Mandhana" for "Smriti Mandhana", "MS Dhoni" for "Mahendra Singh Dhoni"
fn initials_match(mention: &[&str], name: &[&str]) -> bool {
    let (Some((m_last, m_given)), Some((n_last, n_given))) = (mention.split_last(), name.split_last()) else {
        return false;
    };
    if m_given.is_empty() || n_given.is_empty() || !m_last.eq_ignore_ascii_case(n_last) {
        return false;
    }
    let initials = |parts: &[&str]| -> String {
        parts
            .iter()
            .filter_map(|p| p.chars().next())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let letters = |parts: &[&str]| -> String { parts.concat().to_lowercase() };
    // One side spells given names out, the other abbreviates them
    initials(m_given) == letters(n_given) || initials(n_given) == letters(m_given)
}

fn first_char_eq(a: &str, b: &str) -> bool {
    a.chars().next() == b.chars().next()
}

impl IntentResolver {
    pub fn new(settings: ResolverSettings) -> Result<Self, regex::Error> {
        let mut metric_phrases: Vec<(Vec<String>, Metric)> = METRIC_PHRASES
            .iter()
            .map(|(p, m)| (words(p), *m))
            .collect();
        // Longest phrase wins, so "bowling strike rate" beats "strike rate"
        metric_phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut vocabulary: HashSet<String> = VOCABULARY.iter().map(|w| w.to_string()).collect();
        vocabulary.extend(STOPWORDS.iter().map(|w| w.to_string()));
        vocabulary.extend(LEADERBOARD_CUES.iter().map(|w| w.to_string()));
        vocabulary.extend(BOWLING_CUES.iter().map(|w| w.to_string()));
        vocabulary.extend(TEAM_CUES.iter().map(|w| w.to_string()));
        let lexicon = METRIC_PHRASES
            .iter()
            .map(|(p, _)| *p)
            .chain(PHASE_PHRASES.iter().map(|(p, _)| *p))
            .chain(PER_MATCH_PHRASES.iter().copied())
            .chain(PER_SEASON_PHRASES.iter().copied())
            .chain(FIRST_INNINGS_PHRASES.iter().copied())
            .chain(SECOND_INNINGS_PHRASES.iter().copied())
            .chain(HEAD_TO_HEAD_PHRASES.iter().copied());
        for phrase in lexicon {
            vocabulary.extend(words(phrase));
        }

        Ok(Self {
            settings,
            token_re: Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'’.\-&]*")?,
            over_range_re: Regex::new(r"(?i)\bovers?\s+(\d{1,2})\s*(?:-|–|to)\s*(\d{1,2})\b")?,
            year_range_re: Regex::new(r"\b((?:19|20)\d{2})\s*(?:-|–|to|and|until|through)\s*((?:19|20)\d{2})\b")?,
            since_re: Regex::new(r"(?i)\b(?:since|after|from)\s+((?:19|20)\d{2})\b")?,
            year_re: Regex::new(r"\b((?:19|20)\d{2})\b")?,
            top_n_re: Regex::new(r"(?i)\btop\s+(\d{1,3})\b")?,
            metric_phrases,
            vocabulary,
        })
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn resolve(&self, query: &str, registry: &SchemaRegistry) -> Result<QueryIntent, PipelineError> {
        let tokens = self.tokenize(query);
        if tokens.is_empty() {
            return Err(PipelineError::UnsupportedQueryType("empty question".to_string()));
        }

        let mut consumed = vec![false; tokens.len()];
        let venue = self.match_venue(&tokens, registry, &mut consumed);
        let mentions = self.match_subjects(&tokens, registry, &mut consumed);

        let unresolved = self.unresolved_spans(&tokens, &consumed);
        if !unresolved.is_empty() {
            debug!("Unresolved mentions: {:?}", unresolved);
            return Err(PipelineError::UnresolvedEntity { mentions: unresolved });
        }

        let mut degraded = Vec::new();
        for mention in mentions.iter().filter(|m| !m.exact) {
            degraded.push(Degradation::ApproximateEntity {
                mention: mention.subject.mention.clone(),
                resolved: mention.subject.name.clone(),
                similarity: mention.subject.similarity,
            });
        }

        let explicit_metric = self.match_metric(&tokens);
        let bowling_language = has_word(&tokens, BOWLING_CUES);
        let leaderboard_cue = has_word(&tokens, LEADERBOARD_CUES);

        let (team_mentions, player_mentions): (Vec<&Mention>, Vec<&Mention>) =
            mentions.iter().partition(|m| m.subject.kind == SubjectKind::Team);

        let is_opponent = |m: &Mention| {
            m.start > 0 && OPPONENT_CUES.contains(&tokens[m.start - 1].lower.as_str())
        };

        // Head-to-head between two teams
        let head_to_head = contains_any_phrase(&tokens, HEAD_TO_HEAD_PHRASES)
            || (team_mentions.len() == 2 && is_opponent(team_mentions[1]));
        let results_only = explicit_metric
            .as_ref()
            .map_or(true, |m| m.metrics().iter().all(|x| x.role() == MetricRole::Results));
        if player_mentions.is_empty() && team_mentions.len() == 2 && head_to_head && results_only && !leaderboard_cue {
            let mut intent = QueryIntent::new(QueryType::MatchAnalysis, MetricRequest::Single(Metric::Wins));
            intent.subject_entities = team_mentions.iter().map(|m| m.subject.clone()).collect();
            self.apply_scopes(&mut intent, &tokens, query, registry, venue, None)?;
            intent.degraded.extend(degraded);
            return Ok(intent);
        }

        let query_type;
        let subjects: Vec<&Mention>;
        let team_filters: Vec<&Mention>;
        if player_mentions.is_empty() && leaderboard_cue {
            query_type = QueryType::Leaderboard;
            subjects = Vec::new();
            team_filters = team_mentions;
        } else if !player_mentions.is_empty() {
            subjects = player_mentions;
            team_filters = team_mentions;
            query_type = if subjects.len() == 1 {
                QueryType::PlayerStats
            } else {
                QueryType::Comparison
            };
        } else if !team_mentions.is_empty() {
            let (opponents, own): (Vec<&Mention>, Vec<&Mention>) =
                team_mentions.iter().copied().partition(|m| is_opponent(*m));
            if own.is_empty() {
                subjects = opponents;
                team_filters = Vec::new();
            } else {
                subjects = own;
                team_filters = opponents;
            }
            query_type = if subjects.len() == 1 {
                QueryType::TeamStats
            } else {
                QueryType::Comparison
            };
        } else {
            return Err(PipelineError::UnsupportedQueryType(
                "the question names no player or team and asks for no ranking".to_string(),
            ));
        }

        let metric = match explicit_metric {
            Some(metric) => metric,
            None => {
                degraded.push(Degradation::DefaultMetricBundle);
                let bundle = if bowling_language {
                    Metric::BOWLING_BUNDLE
                } else {
                    Metric::BATTING_BUNDLE
                };
                MetricRequest::Ambiguous(bundle.to_vec())
            }
        };
        let metrics = metric.metrics();
        let role = metrics.first().map(Metric::role).unwrap_or(MetricRole::Batting);

        let subject_kind = subjects.first().map(|m| m.subject.kind);
        if role == MetricRole::Results && subject_kind == Some(SubjectKind::Player) {
            return Err(PipelineError::UnsupportedQueryType(
                "match results are tracked per team, not per player".to_string(),
            ));
        }

        let mut intent = QueryIntent::new(query_type, metric);
        intent.subject_entities = subjects.iter().map(|m| m.subject.clone()).collect();

        for team in &team_filters {
            let column = if is_opponent(*team) {
                opponent_column(role)
            } else {
                subject_column(role, SubjectKind::Team)
            };
            let column = column.ok_or_else(|| {
                PipelineError::UnsupportedQueryType(
                    "team filters on match results are only answered head-to-head".to_string(),
                )
            })?;
            intent.filters.push(IntentFilter::eq(
                BALL_EVENTS,
                column,
                Literal::text(team.subject.name.clone()),
            ));
        }

        if query_type == QueryType::Leaderboard {
            intent.ranking = Some(self.ranking(&tokens, query, metrics.first().copied(), role));
        }

        self.apply_scopes(&mut intent, &tokens, query, registry, venue, Some(role))?;
        intent.degraded.extend(degraded);

        debug!(
            "Resolved intent: type={} subjects={} metric={:?} phase={}",
            intent.query_type.as_str(),
            intent.subject_entities.len(),
            intent.metric,
            intent.phase_scope.as_str()
        );
        Ok(intent)
    }

    /// Phase, season, innings, venue, granularity and super-over handling
    fn apply_scopes(
        &self,
        intent: &mut QueryIntent,
        tokens: &[Token],
        query: &str,
        registry: &SchemaRegistry,
        venue: Option<String>,
        role: Option<MetricRole>,
    ) -> Result<(), PipelineError> {
        let ball_level = !matches!(role, None | Some(MetricRole::Results));

        let (phase, phase_degradation) = self.match_phase(tokens, query);
        if let Some(d) = phase_degradation {
            intent.degraded.push(d);
        }
        if phase != Phase::All && !ball_level {
            return Err(PipelineError::UnsupportedQueryType(
                "match results cannot be split by phase".to_string(),
            ));
        }
        intent.phase_scope = phase;

        intent.season_scope = self.match_season(query, tokens, registry);

        if ball_level {
            let innings = if contains_any_phrase(tokens, FIRST_INNINGS_PHRASES) {
                Some(1)
            } else if contains_any_phrase(tokens, SECOND_INNINGS_PHRASES) {
                Some(2)
            } else {
                None
            };
            if let Some(innings) = innings {
                intent
                    .filters
                    .push(IntentFilter::eq(BALL_EVENTS, "innings", Literal::Int(innings)));
            }
        }

        if let Some(venue) = venue {
            intent.filters.push(IntentFilter::eq(MATCHES, "venue", Literal::Text(venue)));
        }

        intent.aggregation_granularity = if contains_any_phrase(tokens, PER_MATCH_PHRASES) {
            Granularity::PerMatch
        } else if contains_any_phrase(tokens, PER_SEASON_PHRASES) {
            Granularity::PerSeason
        } else {
            Granularity::Overall
        };

        intent.include_super_overs = contains_phrase(tokens, "super over") || contains_phrase(tokens, "super overs");
        Ok(())
    }

    fn tokenize(&self, query: &str) -> Vec<Token> {
        self.token_re
            .find_iter(query)
            .filter_map(|m| {
                let mut text = m.as_str();
                for suffix in ["'s", "’s", "'", "’"] {
                    if let Some(stripped) = text.strip_suffix(suffix) {
                        text = stripped;
                        break;
                    }
                }
                let text = text.trim_end_matches(['.', '-']);
                if text.is_empty() {
                    return None;
                }
                let capitalized = text.chars().next().is_some_and(char::is_uppercase);
                Some(Token {
                    text: text.to_string(),
                    lower: text.to_lowercase(),
                    capitalized,
                })
            })
            .collect()
    }

    fn match_venue(&self, tokens: &[Token], registry: &SchemaRegistry, consumed: &mut [bool]) -> Option<String> {
        let preceded_by_cue = |start: usize| {
            let mut i = start;
            if i > 0 && tokens[i - 1].lower == "the" {
                i -= 1;
            }
            i > 0 && VENUE_CUES.contains(&tokens[i - 1].lower.as_str())
        };

        let mut best: Option<(usize, usize, &String)> = None;
        for venue in registry.enumerated_values(MATCHES, "venue") {
            let head = venue.split(',').next().unwrap_or(venue);
            let head_words: Vec<String> = self
                .tokenize(head)
                .into_iter()
                .map(|t| t.lower)
                .collect();
            if head_words.is_empty() {
                continue;
            }

            let mut found = (0..tokens.len())
                .find(|&i| phrase_at(tokens, i, &head_words) && preceded_by_cue(i))
                .map(|i| (i, head_words.len()));

            if found.is_none() {
                let distinctive = head_words
                    .iter()
                    .find(|w| w.chars().count() >= 5 && !GENERIC_VENUE_WORDS.contains(&w.as_str()));
                if let Some(word) = distinctive {
                    found = (0..tokens.len())
                        .find(|&i| &tokens[i].lower == word && preceded_by_cue(i))
                        .map(|i| {
                            // Swallow trailing generic words such as "Stadium"
                            let mut len = 1;
                            while i + len < tokens.len()
                                && GENERIC_VENUE_WORDS.contains(&tokens[i + len].lower.as_str())
                            {
                                len += 1;
                            }
                            (i, len)
                        });
                }
            }

            if let Some((start, len)) = found {
                let better = match best {
                    None => true,
                    Some((_, best_len, best_name)) => len > best_len || (len == best_len && venue < best_name),
                };
                if better {
                    best = Some((start, len, venue));
                }
            }
        }

        best.map(|(start, len, venue)| {
            for flag in consumed.iter_mut().skip(start).take(len) {
                *flag = true;
            }
            debug!("Matched venue {}", venue);
            venue.clone()
        })
    }

    fn match_subjects(&self, tokens: &[Token], registry: &SchemaRegistry, consumed: &mut [bool]) -> Vec<Mention> {
        let mut mentions = Vec::new();
        for len in (1..=MAX_NAME_TOKENS.min(tokens.len())).rev() {
            for start in 0..=(tokens.len() - len) {
                let span = &tokens[start..start + len];
                if consumed[start..start + len].iter().any(|c| *c) {
                    continue;
                }
                let first = &span[0].lower;
                let function_word = |t: &Token| !t.capitalized && STOPWORDS.contains(&t.lower.as_str());
                if function_word(&span[0]) || function_word(&span[len - 1]) {
                    continue;
                }
                if len == 1 && (self.vocabulary.contains(first) || first.chars().all(|c| c.is_ascii_digit())) {
                    continue;
                }

                let Some(candidate) = self.best_candidate(span, registry) else {
                    continue;
                };
                for flag in &mut consumed[start..start + len] {
                    *flag = true;
                }
                let mention = span.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
                mentions.push(Mention {
                    start,
                    exact: candidate.exact,
                    subject: SubjectRef {
                        kind: candidate.entry.kind,
                        name: candidate.entry.name.clone(),
                        mention,
                        resolved_id: candidate.entry.id.clone(),
                        similarity: candidate.similarity,
                    },
                });
            }
        }
        mentions.sort_by_key(|m| m.start);
        mentions
    }

    fn best_candidate<'r>(&self, span: &[Token], registry: &'r SchemaRegistry) -> Option<Candidate<'r>> {
        let mut best: Option<Candidate<'r>> = None;
        for entry in registry.all_subjects() {
            let Some(candidate) = self.score(span, entry) else {
                continue;
            };
            if candidate.similarity < self.settings.similarity_threshold {
                continue;
            }
            let replace = match &best {
                None => true,
                Some(current) => compare_candidates(&candidate, current) == Ordering::Less,
            };
            if replace {
                best = Some(candidate);
            }
        }
        best
    }

    fn score<'r>(&self, span: &[Token], entry: &'r SubjectEntry) -> Option<Candidate<'r>> {
        let mention: String = span.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
        let mention_lower = mention.to_lowercase();
        let name_lower = entry.name.to_lowercase();
        let distance = levenshtein(&mention_lower, &name_lower);

        let exact = |similarity: f64| Candidate {
            entry,
            exact: similarity >= 1.0,
            distance,
            similarity,
        };

        if mention_lower == name_lower {
            return Some(exact(1.0));
        }
        for alias in &entry.aliases {
            // Short aliases such as "MI" must match with their case
            let hit = if alias.chars().count() <= 4 {
                mention == *alias
            } else {
                mention_lower == alias.to_lowercase()
            };
            if hit {
                return Some(Candidate {
                    entry,
                    exact: true,
                    distance: 0,
                    similarity: 1.0,
                });
            }
        }

        let mention_words: Vec<&str> = mention_lower.split_whitespace().collect();
        let name_words: Vec<&str> = name_lower.split_whitespace().collect();

        if span.len() == 1 {
            let token = &span[0];
            if !token.capitalized || token.lower.chars().count() < 3 {
                return None;
            }
            let partial = match entry.kind {
                SubjectKind::Player => name_words.len() > 1 && name_words.last() == Some(&token.lower.as_str()),
                SubjectKind::Team => {
                    token.lower.chars().count() >= 4 && name_words.len() > 1 && name_words.first() == Some(&token.lower.as_str())
                }
            };
            return partial.then(|| exact(PARTIAL_NAME_SIMILARITY));
        }

        if initials_match(&mention_words, &name_words) {
            return Some(exact(PARTIAL_NAME_SIMILARITY));
        }

        // Typos rarely change the first letter of a surname
        let same_surname_initial = match (mention_words.last(), name_words.last()) {
            (Some(a), Some(b)) => first_char_eq(a, b),
            _ => false,
        };
        if !same_surname_initial {
            return None;
        }
        let similarity = normalized_levenshtein(&mention_lower, &name_lower)
            .max(token_sort_similarity(&mention_lower, &name_lower))
            .min(0.99);
        Some(exact(similarity))
    }

    /// Spans that look like names but match nothing known: unknown words that
    /// are capitalised, open the question, or follow a subject cue
    fn unresolved_spans(&self, tokens: &[Token], consumed: &[bool]) -> Vec<String> {
        let candidate = |i: usize| {
            let t = &tokens[i];
            !consumed[i] && !self.vocabulary.contains(&t.lower) && !t.lower.chars().any(|c| c.is_ascii_digit())
        };
        let mut spans = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if !candidate(i) {
                i += 1;
                continue;
            }
            let start = i;
            while i < tokens.len() && candidate(i) {
                i += 1;
            }
            let cued = start == 0 || SUBJECT_CUES.contains(&tokens[start - 1].lower.as_str());
            if !cued && !tokens[start..i].iter().any(|t| t.capitalized) {
                continue;
            }
            spans.push(
                tokens[start..i]
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
        spans
    }

    fn match_metric(&self, tokens: &[Token]) -> Option<MetricRequest> {
        let mut taken = vec![false; tokens.len()];
        let mut hits: Vec<(usize, Metric)> = Vec::new();
        for (phrase, metric) in &self.metric_phrases {
            for start in 0..tokens.len() {
                if phrase_at(tokens, start, phrase) && !taken[start..start + phrase.len()].iter().any(|t| *t) {
                    for flag in &mut taken[start..start + phrase.len()] {
                        *flag = true;
                    }
                    hits.push((start, *metric));
                }
            }
        }
        if hits.is_empty() {
            return None;
        }
        hits.sort_by_key(|(pos, _)| *pos);

        let mut scores: Vec<(Metric, usize)> = Vec::new();
        for (_, metric) in &hits {
            match scores.iter_mut().find(|(m, _)| m == metric) {
                Some((_, score)) => *score += 1,
                None => scores.push((*metric, 1)),
            }
        }
        let top = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        let winners: Vec<Metric> = scores
            .into_iter()
            .filter(|(_, s)| *s == top)
            .map(|(m, _)| m)
            .collect();
        if winners.len() == 1 {
            Some(MetricRequest::Single(winners[0]))
        } else {
            Some(MetricRequest::Ambiguous(winners))
        }
    }

    fn match_phase(&self, tokens: &[Token], query: &str) -> (Phase, Option<Degradation>) {
        let mut found: Vec<Phase> = Vec::new();
        for (phrase, phase) in PHASE_PHRASES {
            if contains_phrase(tokens, phrase) && !found.contains(phase) {
                found.push(*phase);
            }
        }

        if let Some(caps) = self.over_range_re.captures(query) {
            let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            let from = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let to = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            match (from, to) {
                (Some(from), Some(to)) => match Phase::from_over_range(from, to) {
                    Some(phase) if !found.contains(&phase) => found.push(phase),
                    Some(_) => {}
                    None => return (Phase::All, Some(Degradation::UnrecognizedPhase { text })),
                },
                _ => return (Phase::All, Some(Degradation::UnrecognizedPhase { text })),
            }
        }

        match found.len() {
            1 => (found[0], None),
            0 => {
                // Phase-like words that matched no lexicon entry
                let vague = tokens.iter().enumerate().find(|(i, t)| {
                    let after_super = *i > 0 && tokens[i - 1].lower == "super";
                    (t.lower == "overs" && !after_super) || t.lower == "phase"
                });
                match vague {
                    Some((i, _)) => {
                        let start = i.saturating_sub(2);
                        let text = tokens[start..=i]
                            .iter()
                            .map(|t| t.text.as_str())
                            .collect::<Vec<_>>()
                            .join(" ");
                        (Phase::All, Some(Degradation::UnrecognizedPhase { text }))
                    }
                    None => (Phase::All, None),
                }
            }
            _ => {
                let text = found.iter().map(Phase::as_str).collect::<Vec<_>>().join(" and ");
                (Phase::All, Some(Degradation::UnrecognizedPhase { text }))
            }
        }
    }

    fn match_season(&self, query: &str, tokens: &[Token], registry: &SchemaRegistry) -> Option<SeasonScope> {
        let parse = |m: Option<regex::Match>| m.and_then(|m| m.as_str().parse::<i64>().ok());

        if let Some(caps) = self.year_range_re.captures(query) {
            if let (Some(a), Some(b)) = (parse(caps.get(1)), parse(caps.get(2))) {
                return Some(SeasonScope::Range {
                    from: a.min(b),
                    to: a.max(b),
                });
            }
        }
        if let Some(caps) = self.since_re.captures(query) {
            if let Some(from) = parse(caps.get(1)) {
                let to = registry.latest_season().unwrap_or(from).max(from);
                return Some(SeasonScope::Range { from, to });
            }
        }
        let years: Vec<i64> = self
            .year_re
            .captures_iter(query)
            .filter_map(|c| parse(c.get(1)))
            .collect();
        if let (Some(min), Some(max)) = (years.iter().min(), years.iter().max()) {
            return Some(if min == max {
                SeasonScope::Single(*min)
            } else {
                SeasonScope::Range { from: *min, to: *max }
            });
        }
        if contains_any_phrase(tokens, CURRENT_SEASON_PHRASES) {
            return registry.latest_season().map(SeasonScope::Single);
        }
        None
    }

    fn ranking(&self, tokens: &[Token], query: &str, metric: Option<Metric>, role: MetricRole) -> Ranking {
        let limit = self
            .top_n_re
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.settings.default_top_n);

        let lower_is_better = metric.is_some_and(|m| m.lower_is_better());
        let direction = if has_word(tokens, &["lowest", "fewest", "least"]) {
            SortDirection::Ascending
        } else if has_word(tokens, &["highest", "most"]) {
            SortDirection::Descending
        } else if has_word(tokens, &["worst"]) == lower_is_better {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };

        let subject_kind = if role == MetricRole::Results || has_word(tokens, TEAM_CUES) {
            SubjectKind::Team
        } else {
            SubjectKind::Player
        };

        let min_balls = match metric {
            Some(m) if m.is_rate() && role != MetricRole::Results => Some(self.settings.min_leaderboard_balls),
            _ => None,
        };

        Ranking {
            subject_kind,
            limit,
            direction,
            min_balls,
        }
    }
}

/// Ordering of competing candidates: exact first, then edit distance, then
/// most recent season, then name
fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.exact
        .cmp(&a.exact)
        .then_with(|| a.distance.cmp(&b.distance))
        .then_with(|| b.entry.last_active_season.cmp(&a.entry.last_active_season))
        .then_with(|| a.entry.name.cmp(&b.entry.name))
        .then_with(|| a.entry.kind.cmp(&b.entry.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSpec, EntitySchema, SemanticType};

    fn player(name: &str, season: i64) -> SubjectEntry {
        SubjectEntry {
            kind: SubjectKind::Player,
            name: name.to_string(),
            id: Some(name.to_lowercase().replace(' ', "_")),
            aliases: vec![],
            last_active_season: Some(season),
        }
    }

    fn team(name: &str, alias: &str, season: i64) -> SubjectEntry {
        SubjectEntry {
            kind: SubjectKind::Team,
            name: name.to_string(),
            id: None,
            aliases: vec![alias.to_string()],
            last_active_season: Some(season),
        }
    }

    fn registry() -> SchemaRegistry {
        let mut rohit = player("RG Sharma", 2024);
        rohit.aliases.push("Rohit Sharma".to_string());
        let matches = EntitySchema {
            entity_name: MATCHES.to_string(),
            columns: vec![ColumnSpec::new("venue", SemanticType::Text, true).with_enumerated_values(vec![
                "Eden Gardens, Kolkata".to_string(),
                "Wankhede Stadium, Mumbai".to_string(),
            ])],
            relationships: vec![],
            row_count: 0,
        };
        SchemaRegistry::new(
            "test",
            vec![matches],
            vec![
                player("Player A", 2024),
                player("Smriti Mandhana", 2024),
                player("V Kohli", 2024),
                player("MM Sharma", 2021),
                rohit,
                player("JJ Bumrah", 2024),
                team("Mumbai Indians", "MI", 2024),
                team("Chennai Super Kings", "CSK", 2024),
                team("Delhi Daredevils", "DD", 2018),
                team("Delhi Capitals", "DC", 2024),
            ],
        )
    }

    fn resolver() -> IntentResolver {
        IntentResolver::new(ResolverSettings::default()).unwrap()
    }

    fn resolve(query: &str) -> Result<QueryIntent, PipelineError> {
        resolver().resolve(query, &registry())
    }

    #[test]
    fn test_wickets_in_powerplay_season() {
        let intent = resolve("Wickets by Player A in powerplay, Season 2024").unwrap();
        assert_eq!(intent.query_type, QueryType::PlayerStats);
        assert_eq!(intent.subject_entities[0].name, "Player A");
        assert_eq!(intent.metric, MetricRequest::Single(Metric::Wickets));
        assert_eq!(intent.phase_scope, Phase::Powerplay);
        assert_eq!(intent.season_scope, Some(SeasonScope::Single(2024)));
        assert!(!intent.include_super_overs);
        assert!(!intent.is_degraded());
    }

    #[test]
    fn test_unknown_player_is_unresolved() {
        let err = resolve("Stats for Player Z").unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnresolvedEntity {
                mentions: vec!["Player Z".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_names_are_unresolved_in_any_case() {
        let cases = [
            ("stats for player z", "player z"),
            ("how many runs did ms dhoni score", "ms dhoni"),
            ("Dhoni stats", "Dhoni"),
            ("Dhoni runs in 2024", "Dhoni"),
            ("dhoni runs", "dhoni"),
            ("V Kohli runs against zimbabwe", "zimbabwe"),
        ];
        for (query, mention) in cases {
            match resolve(query) {
                Err(PipelineError::UnresolvedEntity { mentions }) => {
                    assert_eq!(mentions, vec![mention.to_string()], "{}", query)
                }
                other => panic!("{}: expected an unresolved entity, got {:?}", query, other),
            }
        }
    }

    #[test]
    fn test_lowercase_filler_is_not_a_name() {
        let intent = resolve("how many wickets did JJ Bumrah take while defending").unwrap();
        assert_eq!(intent.subject_entities[0].name, "JJ Bumrah");
        assert!(matches!(
            resolve("what is cricket"),
            Err(PipelineError::UnsupportedQueryType(_))
        ));
    }

    #[test]
    fn test_full_name_alias_resolves_to_scorecard_name() {
        let intent = resolve("how many runs did rohit sharma score").unwrap();
        assert_eq!(intent.subject_entities.len(), 1);
        assert_eq!(intent.subject_entities[0].name, "RG Sharma");
        assert_eq!(intent.subject_entities[0].similarity, 1.0);
        assert_eq!(intent.metric, MetricRequest::Single(Metric::Runs));
        assert!(!intent.is_degraded());
    }

    #[test]
    fn test_case_variants_resolve() {
        for query in [
            "Smriti Mandhana runs",
            "smriti mandhana runs",
            "SMRITI MANDHANA runs",
            "runs by sMrItI mAnDhAnA",
        ] {
            let intent = resolve(query).unwrap();
            assert_eq!(intent.subject_entities.len(), 1, "{}", query);
            assert_eq!(intent.subject_entities[0].name, "Smriti Mandhana");
            assert_eq!(intent.subject_entities[0].similarity, 1.0);
        }
    }

    #[test]
    fn test_typo_resolves_approximately() {
        let intent = resolve("Smriti Mandhna strike rate").unwrap();
        assert_eq!(intent.subject_entities[0].name, "Smriti Mandhana");
        assert!(matches!(intent.degraded[0], Degradation::ApproximateEntity { .. }));
        assert_eq!(intent.metric, MetricRequest::Single(Metric::StrikeRate));
    }

    #[test]
    fn test_initials_and_surname_matches() {
        let intent = resolve("Virat Kohli sixes").unwrap();
        assert_eq!(intent.subject_entities[0].name, "V Kohli");

        // Equal edit distance to both Sharmas; the more recently active wins
        let intent = resolve("runs for Sharma").unwrap();
        assert_eq!(intent.subject_entities[0].name, "RG Sharma");
    }

    #[test]
    fn test_team_first_word_match() {
        let intent = resolve("Delhi runs in 2024").unwrap();
        assert_eq!(intent.subject_entities[0].name, "Delhi Capitals");
        assert_eq!(intent.query_type, QueryType::TeamStats);
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(resolve("V Kohli runs in the powerplay").unwrap().phase_scope, Phase::Powerplay);
        assert_eq!(resolve("V Kohli runs in death overs").unwrap().phase_scope, Phase::Death);
        assert_eq!(resolve("V Kohli runs in overs 7-15").unwrap().phase_scope, Phase::Middle);
        let middle = resolve("V Kohli runs in the middle").unwrap();
        assert_eq!(middle.phase_scope, Phase::Middle);
        assert!(middle.degraded.is_empty());
        let plain = resolve("V Kohli runs").unwrap();
        assert_eq!(plain.phase_scope, Phase::All);
        assert!(plain.degraded.is_empty());
    }

    #[test]
    fn test_unrecognized_phase_degrades() {
        let intent = resolve("V Kohli runs in overs 1-10").unwrap();
        assert_eq!(intent.phase_scope, Phase::All);
        assert!(matches!(intent.degraded[0], Degradation::UnrecognizedPhase { .. }));

        let intent = resolve("V Kohli runs in the opening overs").unwrap();
        assert_eq!(intent.phase_scope, Phase::All);
        assert!(intent.is_degraded());
    }

    #[test]
    fn test_metric_scoring() {
        let intent = resolve("JJ Bumrah bowling strike rate").unwrap();
        assert_eq!(intent.metric, MetricRequest::Single(Metric::BowlingStrikeRate));

        let intent = resolve("V Kohli runs and wickets").unwrap();
        assert_eq!(
            intent.metric,
            MetricRequest::Ambiguous(vec![Metric::Runs, Metric::Wickets])
        );

        let intent = resolve("JJ Bumrah bowling stats").unwrap();
        assert_eq!(intent.metric, MetricRequest::Ambiguous(Metric::BOWLING_BUNDLE.to_vec()));
        assert!(intent.degraded.contains(&Degradation::DefaultMetricBundle));
    }

    #[test]
    fn test_leaderboard() {
        let intent = resolve("Top 5 run scorers in 2023").unwrap();
        assert_eq!(intent.query_type, QueryType::Leaderboard);
        let ranking = intent.ranking.unwrap();
        assert_eq!(ranking.limit, 5);
        assert_eq!(ranking.direction, SortDirection::Descending);
        assert_eq!(ranking.subject_kind, SubjectKind::Player);
        assert_eq!(ranking.min_balls, None);

        let intent = resolve("Best economy in death overs").unwrap();
        let ranking = intent.ranking.unwrap();
        assert_eq!(ranking.direction, SortDirection::Ascending);
        assert_eq!(ranking.limit, 10);
        assert_eq!(ranking.min_balls, Some(60));
    }

    #[test]
    fn test_opponent_and_innings_filters() {
        let intent = resolve("V Kohli runs against CSK while chasing").unwrap();
        assert_eq!(intent.query_type, QueryType::PlayerStats);
        assert_eq!(
            intent.filters,
            vec![
                IntentFilter::eq(BALL_EVENTS, "bowling_team", Literal::text("Chennai Super Kings")),
                IntentFilter::eq(BALL_EVENTS, "innings", Literal::Int(2)),
            ]
        );
    }

    #[test]
    fn test_venue_filter() {
        let intent = resolve("V Kohli runs at Eden Gardens").unwrap();
        assert_eq!(
            intent.filters,
            vec![IntentFilter::eq(MATCHES, "venue", Literal::text("Eden Gardens, Kolkata"))]
        );
        let intent = resolve("V Kohli runs at the Wankhede").unwrap();
        assert_eq!(
            intent.filters,
            vec![IntentFilter::eq(MATCHES, "venue", Literal::text("Wankhede Stadium, Mumbai"))]
        );
    }

    #[test]
    fn test_head_to_head() {
        let intent = resolve("MI vs CSK head to head").unwrap();
        assert_eq!(intent.query_type, QueryType::MatchAnalysis);
        assert_eq!(intent.subject_entities.len(), 2);
        assert_eq!(intent.metric, MetricRequest::Single(Metric::Wins));
    }

    #[test]
    fn test_comparison_and_granularity() {
        let intent = resolve("Compare V Kohli and RG Sharma strike rate season by season").unwrap();
        assert_eq!(intent.query_type, QueryType::Comparison);
        assert_eq!(intent.aggregation_granularity, Granularity::PerSeason);
        let names: Vec<&str> = intent.subject_entities.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["V Kohli", "RG Sharma"]);
    }

    #[test]
    fn test_season_scopes() {
        let intent = resolve("V Kohli runs from 2020 to 2022").unwrap();
        assert_eq!(intent.season_scope, Some(SeasonScope::Range { from: 2020, to: 2022 }));
        let intent = resolve("V Kohli runs since 2022").unwrap();
        assert_eq!(intent.season_scope, Some(SeasonScope::Range { from: 2022, to: 2024 }));
        let intent = resolve("V Kohli runs this season").unwrap();
        assert_eq!(intent.season_scope, Some(SeasonScope::Single(2024)));
    }

    #[test]
    fn test_super_over_mention() {
        assert!(resolve("JJ Bumrah wickets in super overs").unwrap().include_super_overs);
    }

    #[test]
    fn test_unsupported_query() {
        assert!(matches!(
            resolve("what is cricket"),
            Err(PipelineError::UnsupportedQueryType(_))
        ));
        assert!(matches!(
            resolve("V Kohli wins"),
            Err(PipelineError::UnsupportedQueryType(_))
        ));
    }
}
