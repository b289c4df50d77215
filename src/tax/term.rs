use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

/// Holding period bucket of a matched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Term {
    Short,
    Long,
}

impl Term {
    pub fn display(&self) -> &'static str {
        match self {
            Term::Short => "short",
            Term::Long => "long",
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Which rows a report keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TermFilter {
    Short,
    Long,
    #[default]
    Unfiltered,
}

impl TermFilter {
    pub fn includes(self, term: Term) -> bool {
        match self {
            TermFilter::Short => term == Term::Short,
            TermFilter::Long => term == Term::Long,
            TermFilter::Unfiltered => true,
        }
    }
}

/// First disposal date that counts as long-term: one year and one day
/// after acquisition.
///
/// An anniversary that does not exist (29 February) rolls into 1 March.
pub fn long_term_date(acquired: NaiveDate) -> NaiveDate {
    // chrono clamps to the last day of the month, undo that
    let clamped = acquired + Months::new(12);
    let anniversary = if clamped.day() == acquired.day() {
        clamped
    } else {
        clamped + Days::new(1)
    };
    anniversary + Days::new(1)
}

pub fn classify(acquired: NaiveDate, disposed: NaiveDate) -> Term {
    if disposed >= long_term_date(acquired) {
        Term::Long
    } else {
        Term::Short
    }
}

pub fn holding_days(acquired: NaiveDate, disposed: NaiveDate) -> i64 {
    (disposed - acquired).num_days()
}
