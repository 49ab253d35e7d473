//! Deterministic reading of the donation text.
//!
//! The model does the heavy lifting; these tables pin down the parts of the
//! extraction that must not depend on which model answered: handling cues,
//! food words echoed into notes, and relative pickup phrases.

use chrono::{Days, NaiveDate, NaiveTime};

use foodlink_core::domain::donation::{DonationRecord, FoodType, Handling, PickupWindow};

const REFRIGERATION_CUES: &[&str] = &[
    "refrigerated",
    "refrigerate",
    "refrigeration",
    "refrigerator",
    "fridge",
    "chilled",
    "keep cold",
    "kept cold",
    "cold chain",
];
const FREEZING_CUES: &[&str] = &["frozen", "freezer", "freeze", "freezing"];
const FRAGILE_CUES: &[&str] = &["fragile", "delicate", "easily broken", "breakable"];
const HEAVY_CUES: &[&str] =
    &["heavy", "bulk", "bulky", "difficult to move", "hard to move", "pallet", "pallets"];

// "don't" and friends split into "don" + "t" once punctuation is dropped.
const NEGATIONS: &[&str] = &[
    "no", "not", "without", "non", "never", "don", "doesn", "isn", "aren", "needn", "t",
];
// A negation does not reach across these.
const CLAUSE_BREAKS: &[&str] = &["but", "however", "although", "though"];
const NEGATION_WINDOW: usize = 4;

const FOOD_CUES: &[(&str, FoodType)] = &[
    ("bread", FoodType::BakedGoods),
    ("bagel", FoodType::BakedGoods),
    ("bagels", FoodType::BakedGoods),
    ("muffin", FoodType::BakedGoods),
    ("muffins", FoodType::BakedGoods),
    ("pastry", FoodType::BakedGoods),
    ("pastries", FoodType::BakedGoods),
    ("croissant", FoodType::BakedGoods),
    ("croissants", FoodType::BakedGoods),
    ("cake", FoodType::BakedGoods),
    ("cakes", FoodType::BakedGoods),
    ("cookie", FoodType::BakedGoods),
    ("cookies", FoodType::BakedGoods),
    ("donut", FoodType::BakedGoods),
    ("donuts", FoodType::BakedGoods),
    ("produce", FoodType::FreshProduce),
    ("fruit", FoodType::FreshProduce),
    ("vegetable", FoodType::FreshProduce),
    ("vegetables", FoodType::FreshProduce),
    ("veggies", FoodType::FreshProduce),
    ("apple", FoodType::FreshProduce),
    ("apples", FoodType::FreshProduce),
    ("banana", FoodType::FreshProduce),
    ("bananas", FoodType::FreshProduce),
    ("lettuce", FoodType::FreshProduce),
    ("tomato", FoodType::FreshProduce),
    ("tomatoes", FoodType::FreshProduce),
    ("potato", FoodType::FreshProduce),
    ("potatoes", FoodType::FreshProduce),
    ("canned", FoodType::PantryItems),
    ("rice", FoodType::PantryItems),
    ("pasta", FoodType::PantryItems),
    ("cereal", FoodType::PantryItems),
    ("beans", FoodType::PantryItems),
    ("flour", FoodType::PantryItems),
    ("sandwich", FoodType::PreparedFoods),
    ("sandwiches", FoodType::PreparedFoods),
    ("soup", FoodType::PreparedFoods),
    ("casserole", FoodType::PreparedFoods),
    ("lasagna", FoodType::PreparedFoods),
    ("entree", FoodType::PreparedFoods),
    ("entrees", FoodType::PreparedFoods),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DayPart {
    Morning,
    Afternoon,
    Evening,
}

impl DayPart {
    fn hours(self) -> (u32, u32) {
        match self {
            Self::Morning => (8, 12),
            Self::Afternoon => (12, 17),
            Self::Evening => (17, 20),
        }
    }
}

// Longer phrases first: "day after tomorrow morning" also contains "tomorrow morning".
const PICKUP_PHRASES: &[(&str, u64, DayPart)] = &[
    ("day after tomorrow morning", 2, DayPart::Morning),
    ("day after tomorrow afternoon", 2, DayPart::Afternoon),
    ("day after tomorrow evening", 2, DayPart::Evening),
    ("tomorrow morning", 1, DayPart::Morning),
    ("tomorrow afternoon", 1, DayPart::Afternoon),
    ("tomorrow evening", 1, DayPart::Evening),
    ("tomorrow night", 1, DayPart::Evening),
    ("this morning", 0, DayPart::Morning),
    ("this afternoon", 0, DayPart::Afternoon),
    ("this evening", 0, DayPart::Evening),
    ("tonight", 0, DayPart::Evening),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FoodCue {
    pub word: &'static str,
    pub food_type: FoodType,
}

/// Lowercases, turns punctuation into spaces and pads with one space on each
/// side so phrases can be matched on word boundaries.
fn normalize(text: &str) -> String {
    let words = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Splits on clause punctuation, then into lowercase words.
fn clauses(text: &str) -> Vec<Vec<String>> {
    text.to_lowercase()
        .split(|ch: char| matches!(ch, ',' | ';' | '.' | '!' | '?' | ':' | '(' | ')' | '\n'))
        .map(|clause| {
            clause
                .split(|ch: char| !ch.is_alphanumeric())
                .filter(|word| !word.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
        .collect()
}

/// True when one of the few words before `at` negates it.
fn negated(words: &[String], at: usize) -> bool {
    for word in words[..at].iter().rev().take(NEGATION_WINDOW) {
        if CLAUSE_BREAKS.contains(&word.as_str()) {
            return false;
        }
        if NEGATIONS.contains(&word.as_str()) {
            return true;
        }
    }
    false
}

fn mentions(clauses: &[Vec<String>], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    clauses.iter().any(|words| {
        words.len() >= needle.len()
            && (0..=words.len() - needle.len()).any(|at| {
                words[at..at + needle.len()].iter().zip(&needle).all(|(word, cue)| word == cue)
                    && !negated(words, at)
            })
    })
}

fn any_mentioned(clauses: &[Vec<String>], cues: &[&str]) -> bool {
    cues.iter().any(|cue| mentions(clauses, cue))
}

pub fn handling_cues(text: &str) -> Handling {
    let clauses = clauses(text);
    Handling {
        refrigeration: any_mentioned(&clauses, REFRIGERATION_CUES),
        freezing: any_mentioned(&clauses, FREEZING_CUES),
        fragile: any_mentioned(&clauses, FRAGILE_CUES),
        heavy_lifting: any_mentioned(&clauses, HEAVY_CUES),
    }
}

/// Food words in the order they first appear in the text.
pub fn food_cues(text: &str) -> Vec<FoodCue> {
    let normalized = normalize(text);
    let mut found: Vec<(usize, FoodCue)> = FOOD_CUES
        .iter()
        .filter_map(|(word, food_type)| {
            normalized
                .find(&format!(" {word} "))
                .map(|at| (at, FoodCue { word: *word, food_type: *food_type }))
        })
        .collect();
    found.sort_by_key(|(at, _)| *at);
    found.into_iter().map(|(_, cue)| cue).collect()
}

/// Resolves phrases such as "tomorrow morning" against `reference_date`.
pub fn pickup_hint(text: &str, reference_date: NaiveDate) -> Option<PickupWindow> {
    let normalized = normalize(text);
    let (_, offset, part) =
        PICKUP_PHRASES.iter().find(|(phrase, _, _)| normalized.contains(&format!(" {phrase} ")))?;

    let day = reference_date.checked_add_days(Days::new(*offset))?;
    let (start_hour, end_hour) = part.hours();
    let start = day.and_time(NaiveTime::from_hms_opt(start_hour, 0, 0)?);
    let end = day.and_time(NaiveTime::from_hms_opt(end_hour, 0, 0)?);
    PickupWindow::new(start, end).ok()
}

/// True when the text names a clock time ("9am", "10:30", "noon"), which
/// takes precedence over a day-part phrase.
pub fn mentions_clock_time(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();

    for (index, ch) in chars.iter().enumerate() {
        if !ch.is_ascii_digit() {
            continue;
        }
        if chars.get(index + 1) == Some(&':')
            && chars.get(index + 2).is_some_and(|next| next.is_ascii_digit())
        {
            return true;
        }
        let rest: String = chars[index + 1..].iter().collect();
        let rest = rest.trim_start();
        let meridiem = ["a.m", "p.m", "am", "pm"].iter().any(|suffix| {
            rest.strip_prefix(suffix)
                .is_some_and(|tail| !tail.starts_with(|next: char| next.is_alphabetic()))
        });
        if meridiem {
            return true;
        }
    }

    let normalized = normalize(text);
    ["noon", "midnight", "o clock"].iter().any(|word| normalized.contains(&format!(" {word} ")))
}

/// Applies the deterministic rules to a record the model produced for `text`.
///
/// Handling flags cued by the text are forced on (never off), food words are
/// echoed into notes, an `Other` food type takes the first cued category, and
/// a day-part phrase fixes the pickup window unless a clock time was given.
pub fn reconcile(
    mut record: DonationRecord,
    text: &str,
    reference_date: NaiveDate,
) -> DonationRecord {
    let cued = handling_cues(text);
    record.handling.refrigeration |= cued.refrigeration;
    record.handling.freezing |= cued.freezing;
    record.handling.fragile |= cued.fragile;
    record.handling.heavy_lifting |= cued.heavy_lifting;

    let cues = food_cues(text);
    if record.food_type == FoodType::Other {
        if let Some(first) = cues.first() {
            record.food_type = first.food_type;
        }
    }

    let notes_lower = record.notes.as_deref().unwrap_or_default().to_lowercase();
    let mut missing: Vec<&str> = Vec::new();
    for word in cues.iter().map(|cue| cue.word) {
        // "bagel" and "bagels" are the same food.
        let echoed = missing.iter().any(|seen| seen.contains(word) || word.contains(*seen));
        if !echoed && !notes_lower.contains(word) {
            missing.push(word);
        }
    }
    if !missing.is_empty() {
        let echoed = missing.join(", ");
        record.notes = Some(match record.notes.take().filter(|notes| !notes.trim().is_empty()) {
            Some(notes) => format!("{}; {echoed}", notes.trim_end()),
            None => echoed,
        });
    }

    if !mentions_clock_time(text) {
        if let Some(window) = pickup_hint(text, reference_date) {
            record.pickup_window = window;
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use foodlink_core::domain::donation::{
        DonationRecord, FoodType, Handling, PickupWindow, Quantity, QuantityUnit,
    };

    use super::{food_cues, handling_cues, mentions_clock_time, pickup_hint, reconcile};

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
    }

    fn at(day: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn handling_cues_are_independent() {
        assert_eq!(
            handling_cues("Please keep refrigerated"),
            Handling { refrigeration: true, ..Handling::default() }
        );
        assert_eq!(
            handling_cues("Frozen peas in bulk, and some delicate cakes"),
            Handling { refrigeration: false, freezing: true, fragile: true, heavy_lifting: true }
        );
        assert_eq!(handling_cues("Twenty loaves of bread"), Handling::default());
    }

    #[test]
    fn negated_cues_do_not_fire() {
        assert!(!handling_cues("no refrigeration needed").refrigeration);
        assert!(!handling_cues("not heavy at all").heavy_lifting);
        assert!(handling_cues("not heavy, but must be chilled").refrigeration);
    }

    #[test]
    fn negation_reaches_a_few_words_back() {
        assert!(!handling_cues("This bread does not need to be refrigerated").refrigeration);
        assert!(!handling_cues("not too heavy").heavy_lifting);
        assert!(!handling_cues("no need to keep cold").refrigeration);
    }

    #[test]
    fn contractions_negate_cues() {
        assert!(!handling_cues("Please don't freeze these").freezing);
        assert!(!handling_cues("doesn't need refrigeration").refrigeration);
        assert!(!handling_cues("it isn't fragile").fragile);
        assert!(!handling_cues("you needn't refrigerate it").refrigeration);
    }

    #[test]
    fn negation_stops_at_clause_boundaries() {
        let cued = handling_cues("Don't freeze them; keep refrigerated");
        assert!(!cued.freezing);
        assert!(cued.refrigeration);

        let cued = handling_cues("not frozen but chilled");
        assert!(!cued.freezing);
        assert!(cued.refrigeration);

        assert!(handling_cues("no rush at all, these are heavy boxes").heavy_lifting);
    }

    #[test]
    fn cues_match_whole_words_only() {
        assert!(!handling_cues("a heavyweight champion").heavy_lifting);
        assert!(food_cues("breadcrumbs").is_empty());
    }

    #[test]
    fn food_cues_follow_text_order() {
        let words: Vec<_> = food_cues("Rice, bread and apples").iter().map(|c| c.word).collect();
        assert_eq!(words, vec!["rice", "bread", "apples"]);
    }

    #[test]
    fn singular_food_words_are_cued() {
        let words: Vec<_> = food_cues("a cake, one bagel and a muffin").iter().map(|c| c.word).collect();
        assert_eq!(words, vec!["cake", "bagel", "muffin"]);
    }

    #[test]
    fn reconcile_echoes_a_food_once_across_singular_and_plural() {
        let record = DonationRecord {
            food_type: FoodType::Other,
            quantity: Quantity { amount: 7.0, unit: QuantityUnit::Items },
            pickup_window: PickupWindow { start: at(2, 9, 0), end: at(2, 11, 0) },
            handling: Handling::default(),
            notes: Some("Assorted".to_string()),
        };

        let reconciled = reconcile(record, "one bagel plus six bagels and a cake", reference());

        assert_eq!(reconciled.food_type, FoodType::BakedGoods);
        assert_eq!(reconciled.notes.as_deref(), Some("Assorted; bagel, cake"));
    }

    #[test]
    fn tomorrow_morning_resolves_to_eight_until_noon_next_day() {
        let window = pickup_hint("20 loaves of bread, tomorrow morning", reference())
            .expect("pickup hint");
        assert_eq!(window, PickupWindow { start: at(2, 8, 0), end: at(2, 12, 0) });

        let window = pickup_hint("the day after tomorrow morning works", reference())
            .expect("pickup hint");
        assert_eq!(window.start, at(3, 8, 0));
        assert!(pickup_hint("whenever suits you", reference()).is_none());
    }

    #[test]
    fn clock_times_are_detected() {
        assert!(mentions_clock_time("tomorrow morning at 9am"));
        assert!(mentions_clock_time("pickup 10:30"));
        assert!(mentions_clock_time("around 9 a.m."));
        assert!(mentions_clock_time("by noon"));
        assert!(!mentions_clock_time("20 loaves tomorrow morning"));
        assert!(!mentions_clock_time("3 apples"));
    }

    #[test]
    fn reconcile_forces_cued_flags_and_echoes_food_words() {
        let record = DonationRecord {
            food_type: FoodType::Other,
            quantity: Quantity { amount: 20.0, unit: QuantityUnit::Items },
            pickup_window: PickupWindow { start: at(2, 9, 0), end: at(2, 11, 0) },
            handling: Handling::default(),
            notes: None,
        };

        let reconciled = reconcile(record, "20 loaves of bread, tomorrow morning, keep cold", reference());

        assert_eq!(reconciled.food_type, FoodType::BakedGoods);
        assert!(reconciled.handling.refrigeration);
        assert!(!reconciled.handling.freezing);
        assert_eq!(reconciled.notes.as_deref(), Some("bread"));
        assert_eq!(reconciled.pickup_window, PickupWindow { start: at(2, 8, 0), end: at(2, 12, 0) });
    }

    #[test]
    fn reconcile_leaves_negated_needs_off() {
        let record = DonationRecord {
            food_type: FoodType::BakedGoods,
            quantity: Quantity { amount: 12.0, unit: QuantityUnit::Items },
            pickup_window: PickupWindow { start: at(2, 9, 0), end: at(2, 11, 0) },
            handling: Handling::default(),
            notes: Some("bread".to_string()),
        };

        let reconciled = reconcile(
            record,
            "12 loaves of bread, does not need to be refrigerated, please don't freeze",
            reference(),
        );

        assert_eq!(reconciled.handling, Handling::default());
    }

    #[test]
    fn reconcile_keeps_model_choices_that_are_not_contradicted() {
        let record = DonationRecord {
            food_type: FoodType::PreparedFoods,
            quantity: Quantity { amount: 3.0, unit: QuantityUnit::Servings },
            pickup_window: PickupWindow { start: at(2, 9, 0), end: at(2, 10, 0) },
            handling: Handling { fragile: true, ..Handling::default() },
            notes: Some("Sourdough bread bowls".to_string()),
        };

        let reconciled = reconcile(record.clone(), "bread bowls tomorrow morning at 9am", reference());

        assert_eq!(reconciled, record);
    }
}
