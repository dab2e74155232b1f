//! Record reconciliation.
//!
//! Merges accepted raw matches into canonical songs keyed by
//! (trimmed title, trimmed performer). One song may be registered under a
//! different code in every vendor catalog; the reconciler gathers those
//! (partition, code) pairs onto a single entry and orders them by partition
//! priority once the pass is finished.
//!
//! ## Invariants
//!
//! 1. No two entries share a key within one reconciler.
//! 2. An entry never holds the same (partition, code) pair twice.
//! 3. Output is independent of the order records were absorbed in:
//!    identifiers are sorted by (rank, partition, code) at `finish`, and the
//!    language is chosen by the same ordering rather than by arrival order.
//! 4. A language known from the persisted catalog is never replaced or
//!    cleared by a later pass.
//! 5. "New" songs and identifiers are counted against the stored catalog,
//!    whether it was seeded (merge) or only remembered (replace).

use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;

use crate::config::PriorityTable;
use crate::models::{CanonicalSong, Identifier, RawMatch, SongKey};

/// What absorbing one record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// First record for this key
    NewSong,
    /// Known key, new (partition, code) pair
    NewIdentifier,
    /// Nothing new beyond a possible language candidate
    Known,
}

/// Ordering key for a language candidate: records carrying a higher-priority
/// identifier win, records without an identifier come last.
type LanguageRank = (bool, (u8, u32), String, String, String);

#[derive(Debug)]
struct Entry {
    title: String,
    performer: String,
    persisted: bool,
    persisted_language: Option<String>,
    best_language: Option<LanguageRank>,
    identifiers: Vec<Identifier>,
    seen: FxHashSet<Identifier>,
}

impl Entry {
    fn new(title: &str, performer: &str, persisted: bool) -> Self {
        Self {
            title: title.to_string(),
            performer: performer.to_string(),
            persisted,
            persisted_language: None,
            best_language: None,
            identifiers: Vec::new(),
            seen: FxHashSet::default(),
        }
    }

    fn push_identifier(&mut self, id: Identifier) -> bool {
        if self.seen.contains(&id) {
            return false;
        }
        self.seen.insert(id.clone());
        self.identifiers.push(id);
        true
    }
}

/// Finished mapping plus the counters the pass reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Sorted by (title, performer).
    pub songs: Vec<CanonicalSong>,
    pub new_songs: usize,
    pub new_identifiers: usize,
}

/// Owns the canonical mapping for one target-performer pass.
#[derive(Debug)]
pub struct Reconciler {
    priority: PriorityTable,
    entries: FxHashMap<SongKey, Entry>,
    known: FxHashMap<SongKey, FxHashSet<Identifier>>,
    new_identifiers: usize,
}

impl Reconciler {
    pub fn new(priority: PriorityTable) -> Self {
        Self {
            priority,
            entries: FxHashMap::default(),
            known: FxHashMap::default(),
            new_identifiers: 0,
        }
    }

    /// Load previously persisted songs so this pass unions with them.
    pub fn seed(&mut self, persisted: Vec<CanonicalSong>) {
        for song in persisted {
            let key = song.key();
            if key.0.is_empty() || key.1.is_empty() {
                continue;
            }
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(&key.0, &key.1, true));
            entry.persisted = true;
            if entry.persisted_language.is_none() {
                entry.persisted_language = song
                    .language
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty());
            }
            for id in song.identifiers {
                entry.push_identifier(id);
            }
        }
    }

    /// Record what is already stored without merging it, so a pass that
    /// replaces the stored songs still reports only genuinely new ones.
    pub fn remember(&mut self, previous: &[CanonicalSong]) {
        for song in previous {
            let key = song.key();
            if key.0.is_empty() || key.1.is_empty() {
                continue;
            }
            self.known
                .entry(key)
                .or_default()
                .extend(song.identifiers.iter().cloned());
        }
    }

    /// Merge one accepted record.
    ///
    /// # Panics
    /// When the record's title or performer is blank. The match filter never
    /// lets such a record through, so reaching here means a broken contract.
    pub fn absorb(&mut self, record: &RawMatch) -> Absorbed {
        let title = record.title.trim();
        let performer = record.performer_name.trim();
        assert!(
            !title.is_empty(),
            "reconciler received a record with a blank title (performer '{}', code '{}')",
            performer,
            record.source_code
        );
        assert!(
            !performer.is_empty(),
            "reconciler received a record with a blank performer (title '{}')",
            title
        );

        let key: SongKey = (title.to_string(), performer.to_string());
        let known = self.known.get(&key);
        let mut outcome = Absorbed::Known;
        let entry = self.entries.entry(key).or_insert_with(|| {
            outcome = Absorbed::NewSong;
            Entry::new(title, performer, false)
        });

        let identifier = record.identifier();
        if let Some(lang) = record.language() {
            let candidate = language_rank(&self.priority, identifier.as_ref(), lang);
            let better = match &entry.best_language {
                None => true,
                Some(current) => candidate.cmp(current) == Ordering::Less,
            };
            if better {
                entry.best_language = Some(candidate);
            }
        }

        if let Some(id) = identifier {
            let previously_stored = known.is_some_and(|ids| ids.contains(&id));
            if entry.push_identifier(id) {
                if !previously_stored {
                    self.new_identifiers += 1;
                }
                if outcome == Absorbed::Known {
                    outcome = Absorbed::NewIdentifier;
                }
            }
        }

        outcome
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort identifiers once per entry and hand back the finished mapping.
    pub fn finish(self) -> Reconciled {
        let priority = self.priority;
        let known = self.known;
        let mut new_songs = 0;

        let mut songs: Vec<CanonicalSong> = self
            .entries
            .into_iter()
            .map(|(key, mut entry)| {
                if !entry.persisted && !known.contains_key(&key) {
                    new_songs += 1;
                }
                sort_identifiers(&priority, &mut entry.identifiers);
                let language = entry
                    .persisted_language
                    .or_else(|| entry.best_language.map(|rank| rank.4));
                CanonicalSong {
                    title: entry.title,
                    performer: entry.performer,
                    language,
                    identifiers: entry.identifiers,
                }
            })
            .collect();

        songs.sort_by(|a, b| {
            a.title
                .cmp(&b.title)
                .then_with(|| a.performer.cmp(&b.performer))
        });

        Reconciled {
            songs,
            new_songs,
            new_identifiers: self.new_identifiers,
        }
    }
}

fn language_rank(priority: &PriorityTable, id: Option<&Identifier>, lang: &str) -> LanguageRank {
    match id {
        Some(id) => (
            false,
            priority.rank_of(&id.partition),
            id.partition.clone(),
            id.code.clone(),
            lang.to_string(),
        ),
        None => (true, (u8::MAX, 0), String::new(), String::new(), lang.to_string()),
    }
}

/// Stable sort by (partition rank, partition id, code).
pub fn sort_identifiers(priority: &PriorityTable, identifiers: &mut [Identifier]) {
    identifiers.sort_by(|a, b| {
        priority
            .rank_of(&a.partition)
            .cmp(&priority.rank_of(&b.partition))
            .then_with(|| a.partition.cmp(&b.partition))
            .then_with(|| a.code.cmp(&b.code))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PartitionCatalog, PartitionDescriptor};

    fn reconcile<'a>(
        priority: PriorityTable,
        persisted: Vec<CanonicalSong>,
        records: impl IntoIterator<Item = &'a RawMatch>,
    ) -> Reconciled {
        let mut reconciler = Reconciler::new(priority);
        reconciler.seed(persisted);
        for record in records {
            reconciler.absorb(record);
        }
        reconciler.finish()
    }

    fn priority() -> PriorityTable {
        PartitionCatalog::new(
            1,
            vec![
                PartitionDescriptor::unranked("ALL"),
                PartitionDescriptor::ranked("P2", 1),
                PartitionDescriptor::ranked("P1", 2),
            ],
        )
        .priority_table()
    }

    fn raw(title: &str, performer: &str, partition: &str, code: &str) -> RawMatch {
        RawMatch {
            title: title.into(),
            performer_name: performer.into(),
            partition_id: partition.into(),
            source_code: code.into(),
            ..Default::default()
        }
    }

    fn with_lang(mut m: RawMatch, lang: &str) -> RawMatch {
        m.language = Some(lang.into());
        m
    }

    #[test]
    fn test_merge_across_partitions_orders_by_rank() {
        let records = vec![raw("A", "X", "P1", "001"), raw("A", "X", "P2", "002")];
        let out = reconcile(priority(), vec![], &records);
        assert_eq!(out.songs.len(), 1);
        assert_eq!(
            out.songs[0].identifiers,
            vec![Identifier::new("P2", "002"), Identifier::new("P1", "001")]
        );
        assert_eq!(out.new_songs, 1);
        assert_eq!(out.new_identifiers, 2);
    }

    #[test]
    fn test_unranked_and_unknown_partitions_sort_last_lexically() {
        let records = vec![
            raw("A", "X", "ZZ", "1"),
            raw("A", "X", "AA", "9"),
            raw("A", "X", "AA", "1"),
            raw("A", "X", "P1", "5"),
        ];
        let out = reconcile(priority(), vec![], &records);
        assert_eq!(
            out.songs[0].identifiers,
            vec![
                Identifier::new("P1", "5"),
                Identifier::new("AA", "1"),
                Identifier::new("AA", "9"),
                Identifier::new("ZZ", "1"),
            ]
        );
    }

    #[test]
    fn test_no_duplicate_identifiers() {
        let records = vec![
            raw("A", "X", "P1", "001"),
            raw(" A ", "X ", "P1", "001"),
            raw("A", "X", "P1", " 001"),
        ];
        let out = reconcile(priority(), vec![], &records);
        assert_eq!(out.songs.len(), 1);
        assert_eq!(out.songs[0].identifiers, vec![Identifier::new("P1", "001")]);
    }

    #[test]
    fn test_idempotent_across_orderings() {
        let records = vec![
            with_lang(raw("A", "X", "P1", "001"), "台語"),
            raw("B", "X", "P2", "010"),
            with_lang(raw("A", "X", "P2", "002"), "國語"),
            raw("A", "X&Y", "P1", "003"),
            with_lang(raw("B", "X", "", ""), "粵語"),
            raw("B", "X", "ALL", "777"),
        ];
        let forward = reconcile(priority(), vec![], &records);
        let reversed = reconcile(priority(), vec![], records.iter().rev());
        let mut rotated: Vec<&RawMatch> = records.iter().collect();
        rotated.rotate_left(2);
        let rotated = reconcile(priority(), vec![], rotated);

        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
        // P2 outranks P1, so its language wins regardless of arrival order.
        let a = forward.songs.iter().find(|s| s.title == "A" && s.performer == "X").unwrap();
        assert_eq!(a.language.as_deref(), Some("國語"));
    }

    #[test]
    fn test_language_backfilled_from_later_record() {
        let records = vec![
            raw("A", "X", "P1", "001"),
            with_lang(raw("A", "X", "P2", "002"), "國語"),
        ];
        let out = reconcile(priority(), vec![], &records);
        assert_eq!(out.songs[0].language.as_deref(), Some("國語"));
    }

    #[test]
    fn test_missing_code_contributes_language_only() {
        let records = vec![
            raw("A", "X", "P1", "001"),
            with_lang(raw("A", "X", "P2", ""), "英語"),
            with_lang(raw("A", "X", "", "009"), "日語"),
        ];
        let out = reconcile(priority(), vec![], &records);
        assert_eq!(out.songs[0].identifiers, vec![Identifier::new("P1", "001")]);
        assert!(out.songs[0].language.is_some());
    }

    #[test]
    fn test_incremental_merge_unions_identifiers() {
        let persisted = vec![CanonicalSong {
            title: "A".into(),
            performer: "X".into(),
            language: Some("國語".into()),
            identifiers: vec![Identifier::new("P1", "001")],
        }];
        let records = vec![raw("A", "X", "P2", "002")];
        let out = reconcile(priority(), persisted, &records);

        assert_eq!(out.songs.len(), 1);
        assert_eq!(
            out.songs[0].identifiers,
            vec![Identifier::new("P2", "002"), Identifier::new("P1", "001")]
        );
        assert_eq!(out.songs[0].language.as_deref(), Some("國語"));
        assert_eq!(out.new_songs, 0);
        assert_eq!(out.new_identifiers, 1);
    }

    #[test]
    fn test_persisted_language_not_replaced() {
        let persisted = vec![CanonicalSong {
            title: "A".into(),
            performer: "X".into(),
            language: Some("台語".into()),
            identifiers: vec![],
        }];
        let records = vec![with_lang(raw("A", "X", "P2", "002"), "國語")];
        let out = reconcile(priority(), persisted, &records);
        assert_eq!(out.songs[0].language.as_deref(), Some("台語"));
    }

    #[test]
    fn test_persisted_empty_language_is_backfilled() {
        let persisted = vec![CanonicalSong {
            title: "A".into(),
            performer: "X".into(),
            language: Some("".into()),
            identifiers: vec![Identifier::new("P1", "001")],
        }];
        let records = vec![with_lang(raw("A", "X", "P1", "001"), "國語")];
        let out = reconcile(priority(), persisted, &records);
        assert_eq!(out.songs[0].language.as_deref(), Some("國語"));
        assert_eq!(out.new_identifiers, 0);
    }

    #[test]
    fn test_absorb_outcomes() {
        let mut r = Reconciler::new(priority());
        assert_eq!(r.absorb(&raw("A", "X", "P1", "1")), Absorbed::NewSong);
        assert_eq!(r.absorb(&raw("A", "X", "P2", "2")), Absorbed::NewIdentifier);
        assert_eq!(r.absorb(&raw("A", "X", "P2", "2")), Absorbed::Known);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_remembered_songs_are_not_new() {
        let previous = vec![CanonicalSong {
            title: "A".into(),
            performer: "X".into(),
            language: Some("國語".into()),
            identifiers: vec![Identifier::new("P1", "001")],
        }];
        let mut r = Reconciler::new(priority());
        r.remember(&previous);
        assert!(r.is_empty());

        r.absorb(&raw("A", "X", "P1", "001"));
        r.absorb(&raw("A", "X", "P2", "002"));
        r.absorb(&raw("B", "X", "P1", "003"));
        let out = r.finish();

        // Remembered songs are not merged: the language stays unknown.
        assert_eq!(out.songs.len(), 2);
        assert_eq!(out.songs[0].language, None);
        assert_eq!(out.new_songs, 1);
        assert_eq!(out.new_identifiers, 2);
    }

    #[test]
    #[should_panic(expected = "blank title")]
    fn test_blank_title_panics() {
        let mut r = Reconciler::new(priority());
        r.absorb(&raw("  ", "X", "P1", "1"));
    }
}
