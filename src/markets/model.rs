use serde::{Deserialize, Serialize};

use super::MarketKind;

/// The five rolling-history resolutions, tagged `h`, `d`, `w`, `m`, `M` on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
    LongMonth,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::Hour,
        Timeframe::Day,
        Timeframe::Week,
        Timeframe::Month,
        Timeframe::LongMonth,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Timeframe::Hour => "h",
            Timeframe::Day => "d",
            Timeframe::Week => "w",
            Timeframe::Month => "m",
            Timeframe::LongMonth => "M",
        }
    }
}

/// One value per timeframe, serialized as `{"h": .., "d": .., "w": ..,
/// "m": .., "M": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series<T> {
    pub h: Vec<T>,
    pub d: Vec<T>,
    pub w: Vec<T>,
    pub m: Vec<T>,
    #[serde(rename = "M")]
    pub long_m: Vec<T>,
}

impl<T> Series<T> {
    pub fn get(&self, tf: Timeframe) -> &Vec<T> {
        match tf {
            Timeframe::Hour => &self.h,
            Timeframe::Day => &self.d,
            Timeframe::Week => &self.w,
            Timeframe::Month => &self.m,
            Timeframe::LongMonth => &self.long_m,
        }
    }

    pub fn get_mut(&mut self, tf: Timeframe) -> &mut Vec<T> {
        match tf {
            Timeframe::Hour => &mut self.h,
            Timeframe::Day => &mut self.d,
            Timeframe::Week => &mut self.w,
            Timeframe::Month => &mut self.m,
            Timeframe::LongMonth => &mut self.long_m,
        }
    }
}

impl<T: Clone> Series<T> {
    /// A series holding one copy of `value` in every timeframe, the shape
    /// written at seed time.
    pub fn singleton(value: T) -> Self {
        Self {
            h: vec![value.clone()],
            d: vec![value.clone()],
            w: vec![value.clone()],
            m: vec![value.clone()],
            long_m: vec![value],
        }
    }
}

/// The singleton time log aligned index-for-index with every history
/// series, in Unix seconds.
pub type TimeLog = Series<i64>;

/// Current state of one market. Team markets carry an inventory vector,
/// player markets a net long position; the two are told apart by their
/// field names on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snapshot {
    Team { x: Vec<f64>, b: f64 },
    Player {
        #[serde(rename = "N")]
        n: f64,
        b: f64,
    },
}

impl Snapshot {
    pub fn kind(&self) -> MarketKind {
        match self {
            Snapshot::Team { .. } => MarketKind::Team,
            Snapshot::Player { .. } => MarketKind::Player,
        }
    }

    pub fn b(&self) -> f64 {
        match self {
            Snapshot::Team { b, .. } | Snapshot::Player { b, .. } => *b,
        }
    }

    pub fn with_b(&self, b: f64) -> Snapshot {
        match self {
            Snapshot::Team { x, .. } => Snapshot::Team { x: x.clone(), b },
            Snapshot::Player { n, .. } => Snapshot::Player { n: *n, b },
        }
    }
}

/// Rolling history of one market: the primary axis (`x` or `N`) and the
/// liquidity parameter, each per timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hist {
    Team {
        x: Series<Vec<f64>>,
        b: Series<f64>,
    },
    Player {
        #[serde(rename = "N")]
        n: Series<f64>,
        b: Series<f64>,
    },
}

impl Hist {
    pub fn kind(&self) -> MarketKind {
        match self {
            Hist::Team { .. } => MarketKind::Team,
            Hist::Player { .. } => MarketKind::Player,
        }
    }

    pub fn b(&self) -> &Series<f64> {
        match self {
            Hist::Team { b, .. } | Hist::Player { b, .. } => b,
        }
    }

    /// History seeded from a single snapshot, one entry per timeframe.
    pub fn seeded(snapshot: &Snapshot) -> Hist {
        match snapshot {
            Snapshot::Team { x, b } => Hist::Team {
                x: Series::singleton(x.clone()),
                b: Series::singleton(*b),
            },
            Snapshot::Player { n, b } => Hist::Player {
                n: Series::singleton(*n),
                b: Series::singleton(*b),
            },
        }
    }

    /// Trim each `b` series to the length of the time log, hiding the brief
    /// skew window between the snapshotter's per-market writes and its
    /// final time-log write.
    pub fn truncate_b_to(&mut self, time: &TimeLog) {
        let b = match self {
            Hist::Team { b, .. } | Hist::Player { b, .. } => b,
        };
        for tf in Timeframe::ALL {
            let nt = time.get(tf).len();
            let series = b.get_mut(tf);
            if series.len() > nt {
                series.truncate(nt);
            }
        }
    }
}

/// Traded quantity: a claim vector on team markets, a signed scalar on
/// player markets (positive long, negative short once collapsed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Vector(Vec<f64>),
    Scalar(f64),
}

impl Quantity {
    pub fn is_finite(&self) -> bool {
        match self {
            Quantity::Vector(v) => v.iter().all(|q| q.is_finite()),
            Quantity::Scalar(q) => q.is_finite(),
        }
    }

    /// The element-wise negation, used by compensating undos.
    pub fn negated(&self) -> Quantity {
        match self {
            Quantity::Vector(v) => Quantity::Vector(v.iter().map(|q| -q).collect()),
            Quantity::Scalar(q) => Quantity::Scalar(-q),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_wire_format_round_trips() {
        let team: Snapshot = serde_json::from_str(r#"{"x": [1.0, 2.0], "b": 4000.0}"#).unwrap();
        assert!(matches!(team, Snapshot::Team { .. }));
        let raw = serde_json::to_string(&team).unwrap();
        assert!(raw.contains("\"x\""));

        let player: Snapshot = serde_json::from_str(r#"{"N": -3.5, "b": 100.0}"#).unwrap();
        match &player {
            Snapshot::Player { n, b } => {
                assert_eq!(*n, -3.5);
                assert_eq!(*b, 100.0);
            }
            _ => panic!("expected player snapshot"),
        }
        assert!(serde_json::to_string(&player).unwrap().contains("\"N\""));
    }

    #[test]
    fn hist_wire_format_round_trips() {
        let snap = Snapshot::Player { n: 0.0, b: 100.0 };
        let hist = Hist::seeded(&snap);
        let raw = serde_json::to_string(&hist).unwrap();
        let back: Hist = serde_json::from_str(&raw).unwrap();
        assert_eq!(hist, back);
        assert!(raw.contains("\"M\""));
    }

    #[test]
    fn quantity_collapses_to_the_right_variant() {
        let v: Quantity = serde_json::from_str("[1.0, 0.0, 2.0]").unwrap();
        assert!(matches!(v, Quantity::Vector(_)));
        let s: Quantity = serde_json::from_str("-4.5").unwrap();
        assert_eq!(s, Quantity::Scalar(-4.5));
        assert_eq!(s.negated(), Quantity::Scalar(4.5));
    }

    #[test]
    fn truncates_b_to_time_log_lengths() {
        let snap = Snapshot::Team { x: vec![0.0, 0.0], b: 10.0 };
        let mut hist = Hist::seeded(&snap);
        if let Hist::Team { b, .. } = &mut hist {
            b.h.push(11.0);
            b.h.push(12.0);
        }
        let time = TimeLog::singleton(1_700_000_000);
        hist.truncate_b_to(&time);
        assert_eq!(hist.b().h.len(), 1);
        assert_eq!(hist.b().d.len(), 1);
    }
}
