// ============================================================
// Layer 5 — Deduplicator
// ============================================================
// The one stage that needs the whole corpus at once.
//
//   Step 1  Normalise every record's question text (tags stripped,
//           case folded, punctuation gone) and hash it: SHA-256 hex.
//   Step 2  FingerprintIndex: equal fingerprints are exact
//           duplicates. O(1) per record.
//   Step 3  One representative per fingerprint goes into buckets
//           by prefix filtering: its tokens, rarest first, cut to
//           the shortest prefix that any record similar enough to
//           it must share. Only records sharing a bucket are ever
//           compared, and no pair above the near-miss floor is
//           missed, whatever end of the question the edits are at.
//   Step 4  Pairs inside each bucket are scored in parallel
//           (token multiset Jaccard).
//   Step 5  Pairs at or above the threshold are merged, most
//           similar first, but two groups only join when every
//           member of one reaches the threshold with every member
//           of the other. A chain a~b~c never pulls in a record
//           that is far from the rest of its group.
//   Step 6  Each group gets a canonical member: the highest total
//           confidence, ties to the earliest record in the corpus.
//           Compared pairs left in different groups (within the
//           ambiguity margin, or refused by step 5) are near
//           misses between the two canonicals.
//
// Every input record ends up in exactly one group. Retired
// records are kept whole in the audit.
//
// Reference: sha2 crate docs, rayon docs (par_iter),
//            Rust Book §8 (HashMap / BTreeMap)

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::data::preprocessor::Preprocessor;
use crate::domain::duplicate::{DuplicateAudit, DuplicateGroup, MatchKind, NearMiss};
use crate::domain::record::{Flag, QuestionRecord};

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupeConfig {
    /// Pairs scoring at least this are merged
    pub similarity_threshold: f64,
    /// Pairs within this distance below the threshold are flagged, not merged
    pub ambiguity_margin:     f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            ambiguity_margin:     0.05,
        }
    }
}

// ─── Fingerprints ─────────────────────────────────────────────────────────────

/// SHA-256 of the normalised text, hex encoded
pub fn fingerprint(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Per-record data the comparison works on
#[derive(Debug, Clone)]
struct Prepared {
    fingerprint: String,
    /// Normalised tokens, sorted: the multiset used for similarity
    sorted:      Vec<String>,
}

impl Prepared {
    fn new(record: &QuestionRecord, preprocessor: &Preprocessor) -> Self {
        let normalized = preprocessor.normalize_for_fingerprint(&record.plain_text());
        let mut sorted: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();
        sorted.sort();

        Self { fingerprint: fingerprint(&normalized), sorted }
    }

    fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Corpus-scoped map from fingerprint to record positions.
/// Built fresh for every run; nothing survives between runs.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    by_fingerprint: BTreeMap<String, Vec<usize>>,
}

impl FingerprintIndex {
    pub fn insert(&mut self, fingerprint: &str, position: usize) {
        self.by_fingerprint.entry(fingerprint.to_string()).or_default().push(position);
    }

    pub fn get(&self, fingerprint: &str) -> &[usize] {
        self.by_fingerprint.get(fingerprint).map(Vec::as_slice).unwrap_or_default()
    }

    /// Position lists in fingerprint order, each list in corpus order
    pub fn groups(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.by_fingerprint.values()
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}

/// Jaccard similarity of two sorted token multisets
pub fn multiset_jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let (mut i, mut j)          = (0, 0);
    let (mut shared, mut total) = (0usize, 0usize);

    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal   => { shared += 1; total += 1; i += 1; j += 1; }
            std::cmp::Ordering::Less    => { total += 1; i += 1; }
            std::cmp::Ordering::Greater => { total += 1; j += 1; }
        }
    }
    total += (a.len() - i) + (b.len() - j);
    shared as f64 / total as f64
}

// ─── Union-find ───────────────────────────────────────────────────────────────

/// Disjoint sets over corpus positions. The root of a set is always its
/// smallest position, so the result does not depend on union order.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

// ─── Deduplicator ─────────────────────────────────────────────────────────────

/// Surviving records plus everything needed to explain the merge.
#[derive(Debug, Clone, Default)]
pub struct DedupeOutcome {
    /// Canonical records, in corpus order
    pub survivors: Vec<QuestionRecord>,
    pub audit:     DuplicateAudit,
}

pub struct Deduplicator {
    config:       DedupeConfig,
    preprocessor: Preprocessor,
}

impl Deduplicator {
    pub fn new(config: DedupeConfig) -> Self {
        Self { config, preprocessor: Preprocessor::new() }
    }

    pub fn dedupe(&self, corpus: Vec<QuestionRecord>) -> DedupeOutcome {
        let mut corpus = corpus;
        let n = corpus.len();

        // This stage owns the possible-duplicate flag and recomputes it
        for r in corpus.iter_mut() {
            r.flags.remove(&Flag::PossibleDuplicate);
        }

        // ── Step 1: Normalise and hash ────────────────────────────────────────
        let prepared: Vec<Prepared> = corpus
            .par_iter()
            .map(|r| Prepared::new(r, &self.preprocessor))
            .collect();

        // ── Step 2: Exact matches ─────────────────────────────────────────────
        let mut index = FingerprintIndex::default();
        for (pos, p) in prepared.iter().enumerate() {
            // Records with no words at all are never merged with anything
            if !p.is_empty() {
                index.insert(&p.fingerprint, pos);
            }
        }

        let mut sets = DisjointSet::new(n);
        for positions in index.groups() {
            for &other in &positions[1..] {
                sets.union(positions[0], other);
            }
        }

        // ── Step 3: Buckets over one representative per fingerprint ───────────
        let threshold       = self.config.similarity_threshold;
        let floor           = threshold - self.config.ambiguity_margin;
        let representatives: Vec<usize> = index.groups().map(|g| g[0]).collect();
        let buckets = prefix_buckets(&representatives, &prepared, floor);

        // ── Step 4: Score candidate pairs ─────────────────────────────────────
        let mut pairs: Vec<(usize, usize, f64)> = buckets
            .par_iter()
            .flat_map_iter(|members| {
                let mut found = Vec::new();
                for (x, &a) in members.iter().enumerate() {
                    for &b in &members[x + 1..] {
                        let sim = multiset_jaccard(&prepared[a].sorted, &prepared[b].sorted);
                        if sim >= floor {
                            found.push((a.min(b), a.max(b), sim));
                        }
                    }
                }
                found
            })
            .collect();
        pairs.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        pairs.dedup_by(|x, y| x.0 == y.0 && x.1 == y.1);

        // ── Step 5: Merge, keeping every pair inside a group at the threshold ─
        // Representatives are the smallest position of their exact group,
        // so each one is its own root until a near merge happens.
        let mut reps_in: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &r in &representatives {
            reps_in[r].push(r);
        }

        let mut strong: Vec<(usize, usize, f64)> = pairs.iter().copied().filter(|p| p.2 >= threshold).collect();
        strong.sort_by(|x, y| y.2.total_cmp(&x.2).then((x.0, x.1).cmp(&(y.0, y.1))));

        for (a, b, _) in strong {
            let (ra, rb) = (sets.find(a), sets.find(b));
            if ra == rb {
                continue;
            }
            let compatible = reps_in[ra].iter().all(|&x| {
                reps_in[rb]
                    .iter()
                    .all(|&y| multiset_jaccard(&prepared[x].sorted, &prepared[y].sorted) >= threshold)
            });
            if compatible {
                sets.union(ra, rb);
                let (lo, hi) = (ra.min(rb), ra.max(rb));
                let moved    = std::mem::take(&mut reps_in[hi]);
                reps_in[lo].extend(moved);
            }
        }

        // ── Step 6: Groups and canonicals ─────────────────────────────────────
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for pos in 0..n {
            components.entry(sets.find(pos)).or_default().push(pos);
        }

        let mut canonical_of = vec![0usize; n];
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::with_capacity(components.len());
        for members in components.into_values() {
            let canonical = pick_canonical(&members, &corpus);
            for &m in &members {
                canonical_of[m] = canonical;
            }
            groups.push((canonical, members));
        }
        groups.sort_by_key(|(canonical, _)| *canonical);

        // ── Step 7: Near misses between different groups ──────────────────────
        let mut near: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(a, b, sim) in &pairs {
            let (ca, cb) = (canonical_of[a], canonical_of[b]);
            if ca != cb {
                let key  = (ca.min(cb), ca.max(cb));
                let best = near.entry(key).or_insert(sim);
                *best = best.max(sim);
            }
        }
        for &(a, b) in near.keys() {
            corpus[a].flags.insert(Flag::PossibleDuplicate);
            corpus[b].flags.insert(Flag::PossibleDuplicate);
        }
        let near_misses = near
            .into_iter()
            .map(|((a, b), similarity)| NearMiss {
                first:  corpus[a].id.clone(),
                second: corpus[b].id.clone(),
                similarity,
            })
            .collect();

        // ── Step 8: Split corpus into survivors and retired ───────────────────
        let audit_groups: Vec<DuplicateGroup> = groups
            .iter()
            .map(|(canonical, members)| self.describe_group(*canonical, members, &corpus, &prepared))
            .collect();

        let mut survivors = Vec::with_capacity(groups.len());
        let mut retired   = Vec::with_capacity(n - groups.len());
        for (pos, record) in corpus.into_iter().enumerate() {
            if canonical_of[pos] == pos {
                survivors.push(record);
            } else {
                retired.push(record);
            }
        }

        tracing::debug!(
            records   = n,
            groups    = audit_groups.len(),
            retired   = retired.len(),
            compared  = pairs.len(),
            "Deduplicated corpus"
        );

        DedupeOutcome {
            survivors,
            audit: DuplicateAudit { groups: audit_groups, retired, near_misses },
        }
    }

    fn describe_group(
        &self,
        canonical: usize,
        members:   &[usize],
        corpus:    &[QuestionRecord],
        prepared:  &[Prepared],
    ) -> DuplicateGroup {
        let exact = members.iter().all(|&m| prepared[m].fingerprint == prepared[canonical].fingerprint);
        let kind  = match (members.len(), exact) {
            (1, _)     => MatchKind::Unique,
            (_, true)  => MatchKind::Exact,
            (_, false) => MatchKind::Near,
        };

        let similarity = members
            .iter()
            .filter(|&&m| m != canonical)
            .map(|&m| multiset_jaccard(&prepared[canonical].sorted, &prepared[m].sorted))
            .fold(1.0_f64, f64::min);

        DuplicateGroup {
            canonical:   corpus[canonical].id.clone(),
            members:     members.iter().map(|&m| corpus[m].id.clone()).collect(),
            retired:     members.iter().filter(|&&m| m != canonical).map(|&m| corpus[m].id.clone()).collect(),
            kind,
            fingerprint: prepared[canonical].fingerprint.clone(),
            similarity,
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DedupeConfig::default())
    }
}

/// Candidate buckets by prefix filtering.
///
/// Every representative becomes a set of numbered tokens ("the the" is
/// {the#0, the#1}), so set Jaccard equals multiset Jaccard. Elements are
/// ordered by corpus frequency, rarest first. Two sets with similarity at
/// least `floor` share at least `ceil(floor * len)` elements, so they must
/// share one among the first `len - ceil(floor * len) + 1` of each. Each
/// such element is a bucket key.
fn prefix_buckets(representatives: &[usize], prepared: &[Prepared], floor: f64) -> Vec<Vec<usize>> {
    let elements: Vec<(usize, Vec<String>)> = representatives
        .iter()
        .map(|&pos| (pos, numbered(&prepared[pos].sorted)))
        .collect();

    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for (_, els) in &elements {
        for e in els {
            *frequency.entry(e.as_str()).or_insert(0) += 1;
        }
    }

    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (pos, els) in &elements {
        let mut ordered: Vec<&str> = els.iter().map(String::as_str).collect();
        ordered.sort_by_key(|e| (frequency[e], *e));

        let len     = ordered.len();
        // Rounded down a hair so float error never shortens the prefix
        let overlap = (floor.max(0.0) * len as f64 - 1e-9).ceil().max(0.0) as usize;
        let prefix  = (len + 1).saturating_sub(overlap).clamp(1, len.max(1));

        for e in ordered.into_iter().take(prefix) {
            buckets.entry(e).or_default().push(*pos);
        }
    }

    buckets.into_values().filter(|b| b.len() > 1).collect()
}

/// Number repeated tokens of a sorted list: "a a b" → a#0, a#1, b#0
fn numbered(sorted: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(sorted.len());
    let mut run = 0;
    for (i, token) in sorted.iter().enumerate() {
        run = if i > 0 && sorted[i - 1] == *token { run + 1 } else { 0 };
        out.push(format!("{token}#{run}"));
    }
    out
}

/// Highest total confidence wins; on a tie the earliest position.
/// `members` is in corpus order.
fn pick_canonical(members: &[usize], corpus: &[QuestionRecord]) -> usize {
    let mut best = members[0];
    for &m in &members[1..] {
        let (cand, cur) = (corpus[m].confidence.total(), corpus[best].confidence.total());
        if cand.total_cmp(&cur) == std::cmp::Ordering::Greater {
            best = m;
        }
    }
    best
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{AxisConfidence, Difficulty, Provenance, Span};
    use std::collections::BTreeSet;

    fn record(id: &str, spans: Vec<Span>, confidence: f64) -> QuestionRecord {
        let mut r = QuestionRecord::new(id, spans, Difficulty::Preliminary, Provenance::new("d", 0));
        r.confidence = AxisConfidence { region: confidence, era: 0.0, answer_type: 0.0 };
        r
    }

    fn plain(id: &str, text: &str, confidence: f64) -> QuestionRecord {
        record(id, vec![Span::plain(text)], confidence)
    }

    fn ids(records: &[QuestionRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_casing_and_punctuation_are_exact_duplicates() {
        let corpus = vec![
            plain("a", "Who wrote 'Hamlet'?", 0.2),
            record("b", vec![Span::plain("who wrote "), Span::bold("HAMLET")], 0.9),
        ];
        let out = Deduplicator::default().dedupe(corpus);

        assert_eq!(ids(&out.survivors), vec!["b"]);
        assert_eq!(out.audit.groups.len(), 1);
        let g = &out.audit.groups[0];
        assert_eq!(g.kind, MatchKind::Exact);
        assert_eq!(g.canonical, "b");
        assert_eq!(g.retired, vec!["a".to_string()]);
        assert_eq!(g.similarity, 1.0);
        assert_eq!(ids(&out.audit.retired), vec!["a"]);
    }

    #[test]
    fn test_confidence_tie_keeps_earliest() {
        let corpus = vec![plain("first", "Name this river.", 0.5), plain("second", "name this river", 0.5)];
        let out = Deduplicator::default().dedupe(corpus);
        assert_eq!(ids(&out.survivors), vec!["first"]);
    }

    #[test]
    fn test_near_duplicate_is_merged() {
        let corpus = vec![
            plain("a", "Name the city that served as the capital of the Byzantine Empire until 1453", 0.3),
            plain("b", "Name the city that served as the capital of the Byzantine Empire until 1453 AD", 0.3),
        ];
        let out = Deduplicator::default().dedupe(corpus);

        assert_eq!(ids(&out.survivors), vec!["a"]);
        let g = &out.audit.groups[0];
        assert_eq!(g.kind, MatchKind::Near);
        assert!(g.similarity >= 0.85 && g.similarity < 1.0);
    }

    #[test]
    fn test_near_miss_is_flagged_not_merged() {
        let corpus = vec![
            plain("a", "Which city was the capital of the Byzantine Empire until 1453", 0.3),
            plain("b", "Which city was the capital of the Byzantine Empire until the year 1453", 0.3),
        ];
        let out = Deduplicator::default().dedupe(corpus);

        assert_eq!(out.survivors.len(), 2);
        assert!(out.survivors.iter().all(|r| r.has_flag(Flag::PossibleDuplicate)));
        assert_eq!(out.audit.near_misses.len(), 1);
        assert_eq!(out.audit.near_misses[0].first, "a");
        assert!(out.audit.merges().next().is_none());
    }

    #[test]
    fn test_edits_at_both_ends_are_still_compared() {
        let corpus = vec![
            plain("a", "Name the city that the Ottoman Turks captured from the Byzantine emperor when it fell in 1453", 0.3),
            plain("b", "1. Name the city that the Ottoman Turks captured from the Byzantine emperor when it fell in 1453 AD", 0.3),
        ];
        let out = Deduplicator::default().dedupe(corpus);

        assert_eq!(ids(&out.survivors), vec!["a"]);
        assert_eq!(out.audit.groups[0].kind, MatchKind::Near);
        assert!((out.audit.groups[0].similarity - 17.0 / 19.0).abs() < 1e-12);
    }

    /// 20 shared words plus `extra` more, so each text contains the previous one
    fn chain_text(extra: usize) -> String {
        let mut words: Vec<String> = (0..20).map(|i| format!("w{i}")).collect();
        words.extend((0..extra).map(|i| format!("x{i}")));
        words.join(" ")
    }

    #[test]
    fn test_chain_of_near_duplicates_keeps_groups_tight() {
        let corpus: Vec<QuestionRecord> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| plain(id, &chain_text(2 * i), 0.3))
            .collect();
        let out = Deduplicator::default().dedupe(corpus);

        let groups: Vec<(&str, Vec<&str>)> = out
            .audit
            .merges()
            .map(|g| (g.canonical.as_str(), g.members.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(groups, vec![("a", vec!["a", "b"]), ("c", vec!["c", "d", "e"])]);
        for g in &out.audit.groups {
            assert!(g.similarity >= 0.85, "group {} at {}", g.canonical, g.similarity);
        }
        assert_eq!(ids(&out.survivors), vec!["a", "c"]);

        // b~c cleared the threshold but would have pulled b next to d
        assert_eq!(out.audit.near_misses.len(), 1);
        let miss = &out.audit.near_misses[0];
        assert_eq!((miss.first.as_str(), miss.second.as_str()), ("a", "c"));
        assert!((miss.similarity - 22.0 / 24.0).abs() < 1e-12);
        assert!(out.survivors.iter().all(|r| r.has_flag(Flag::PossibleDuplicate)));
    }

    #[test]
    fn test_numbered_tokens() {
        let sorted: Vec<String> = ["a", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(numbered(&sorted), vec!["a#0", "a#1", "b#0"]);
    }

    #[test]
    fn test_every_record_lands_in_exactly_one_group() {
        let corpus = vec![
            plain("a", "Who painted the Mona Lisa?", 0.1),
            plain("b", "Who painted the Mona Lisa", 0.4),
            plain("c", "Which river flows through Cairo?", 0.2),
            plain("d", "", 0.0),
            plain("e", "   ", 0.0),
            plain("f", "WHO PAINTED THE MONA LISA!", 0.4),
        ];
        let input: BTreeSet<String> = corpus.iter().map(|r| r.id.clone()).collect();
        let out = Deduplicator::default().dedupe(corpus);

        let mut seen = BTreeSet::new();
        for g in &out.audit.groups {
            for m in &g.members {
                assert!(seen.insert(m.clone()), "{m} is in two groups");
            }
        }
        assert_eq!(seen, input);

        // Canonicals are exactly the survivors, empty texts stay apart
        let canonicals: Vec<&str> = out.audit.groups.iter().map(|g| g.canonical.as_str()).collect();
        assert_eq!(canonicals, ids(&out.survivors));
        assert_eq!(ids(&out.survivors), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn test_dedupe_is_deterministic_and_idempotent() {
        let corpus = vec![
            plain("a", "Which city was the capital of the Byzantine Empire until 1453", 0.3),
            plain("b", "Which city was the capital of the Byzantine Empire until the year 1453", 0.3),
            plain("c", "which city was the capital of the byzantine empire until 1453?", 0.6),
        ];
        let first  = Deduplicator::default().dedupe(corpus.clone());
        let second = Deduplicator::default().dedupe(corpus);
        assert_eq!(first.survivors, second.survivors);
        assert_eq!(first.audit, second.audit);

        let again = Deduplicator::default().dedupe(first.survivors.clone());
        assert_eq!(again.survivors, first.survivors);
        assert!(again.audit.retired.is_empty());
    }

    #[test]
    fn test_multiset_jaccard_counts_repeats() {
        let a: Vec<String> = ["a", "a", "b"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert!((multiset_jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(multiset_jaccard(&[], &[]), 1.0);
    }

    #[test]
    fn test_fingerprint_index_groups_positions() {
        let mut index = FingerprintIndex::default();
        index.insert("x", 0);
        index.insert("y", 1);
        index.insert("x", 2);
        assert_eq!(index.get("x"), &[0, 2]);
        assert_eq!(index.len(), 2);
        assert!(index.get("z").is_empty());
    }
}
