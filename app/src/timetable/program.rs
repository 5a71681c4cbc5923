use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::core::status::TemperatureName;

pub const HOURS_PER_DAY: usize = 24;
pub const QUARTERS_PER_HOUR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|d| *d == self).unwrap_or(0)
    }

    /// Parse a day from its lowercase English name or from a numeric index
    /// in strftime `%w` convention (0 and 7 are sunday, 1 is monday).
    pub fn parse(value: &str) -> Option<Day> {
        match value.to_ascii_lowercase().as_str() {
            "monday" | "1" => Some(Day::Monday),
            "tuesday" | "2" => Some(Day::Tuesday),
            "wednesday" | "3" => Some(Day::Wednesday),
            "thursday" | "4" => Some(Day::Thursday),
            "friday" | "5" => Some(Day::Friday),
            "saturday" | "6" => Some(Day::Saturday),
            "sunday" | "0" | "7" => Some(Day::Sunday),
            _ => None,
        }
    }
}

impl From<chrono::Weekday> for Day {
    fn from(value: chrono::Weekday) -> Self {
        match value {
            chrono::Weekday::Mon => Day::Monday,
            chrono::Weekday::Tue => Day::Tuesday,
            chrono::Weekday::Wed => Day::Wednesday,
            chrono::Weekday::Thu => Day::Thursday,
            chrono::Weekday::Fri => Day::Friday,
            chrono::Weekday::Sat => Day::Saturday,
            chrono::Weekday::Sun => Day::Sunday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One quarter-hour entry of the program: either a named temperature or a
/// literal value in the working scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Named(TemperatureName),
    Value(f64),
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Named(name) => serializer.serialize_str(&name.to_string()),
            // one decimal is enough and avoids rapid on/off flapping from
            // spurious precision
            Cell::Value(v) => serializer.serialize_f64((v * 10.0).round() / 10.0),
        }
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellVisitor;

        impl de::Visitor<'_> for CellVisitor {
            type Value = Cell;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a finite number or one of `t0`, `tmin`, `tmax`")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Cell, E> {
                if v.is_finite() {
                    Ok(Cell::Value(v))
                } else {
                    Err(E::custom("temperatures must be finite"))
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Cell, E> {
                Ok(Cell::Value(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Cell, E> {
                Ok(Cell::Value(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Cell, E> {
                match v {
                    "t0" => Ok(Cell::Named(TemperatureName::T0)),
                    "tmin" => Ok(Cell::Named(TemperatureName::Tmin)),
                    "tmax" => Ok(Cell::Named(TemperatureName::Tmax)),
                    // legacy program files carry plain numbers as strings
                    other => match other.parse::<f64>() {
                        Ok(v) if v.is_finite() => Ok(Cell::Value(v)),
                        _ => Err(E::custom(format!(
                            "invalid temperature `{other}`, expected a number or one of t0, tmin, tmax"
                        ))),
                    },
                }
            }
        }

        deserializer.deserialize_any(CellVisitor)
    }
}

/// The 24x4 quarter-hour grid of one day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayProgram {
    hours: [[Cell; QUARTERS_PER_HOUR]; HOURS_PER_DAY],
}

fn hour_key(hour: usize) -> String {
    format!("h{hour:02}")
}

/// Parse an hour label: `h00`..`h23`, with a tolerant optional `h` prefix
/// and no zero padding required.
fn parse_hour(value: &str) -> Option<usize> {
    let digits = value.strip_prefix(['h', 'H']).unwrap_or(value);
    match digits.parse::<usize>() {
        Ok(hour) if hour < HOURS_PER_DAY => Some(hour),
        _ => None,
    }
}

impl DayProgram {
    /// A day with the same cell in every quarter.
    pub fn uniform(cell: Cell) -> Self {
        Self {
            hours: [[cell; QUARTERS_PER_HOUR]; HOURS_PER_DAY],
        }
    }

    pub fn cell(&self, hour: usize, quarter: usize) -> Cell {
        self.hours[hour][quarter]
    }

    pub fn set_cell(&mut self, hour: usize, quarter: usize, cell: Cell) {
        self.hours[hour][quarter] = cell;
    }

    fn from_map(map: BTreeMap<String, Vec<Cell>>) -> Result<Self, String> {
        let mut hours = [[Cell::Named(TemperatureName::T0); QUARTERS_PER_HOUR]; HOURS_PER_DAY];
        let mut seen = [false; HOURS_PER_DAY];

        for (key, quarters) in map {
            let hour = parse_hour(&key).ok_or_else(|| format!("invalid hour `{key}`, expected h00..h23"))?;

            if seen[hour] {
                return Err(format!("duplicate hour `{key}`"));
            }

            let quarters: [Cell; QUARTERS_PER_HOUR] = quarters
                .try_into()
                .map_err(|_| format!("hour `{key}` must have exactly {QUARTERS_PER_HOUR} quarters"))?;

            hours[hour] = quarters;
            seen[hour] = true;
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(format!("missing hour `{}`", hour_key(missing)));
        }

        Ok(Self { hours })
    }
}

impl Serialize for DayProgram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(HOURS_PER_DAY))?;
        for (hour, quarters) in self.hours.iter().enumerate() {
            map.serialize_entry(&hour_key(hour), &QuarterList(quarters))?;
        }
        map.end()
    }
}

struct QuarterList<'a>(&'a [Cell; QUARTERS_PER_HOUR]);

impl Serialize for QuarterList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(QUARTERS_PER_HOUR))?;
        for cell in self.0 {
            seq.serialize_element(cell)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DayProgram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Vec<Cell>>::deserialize(deserializer)?;
        DayProgram::from_map(map).map_err(de::Error::custom)
    }
}

/// The full weekly program: one [`DayProgram`] for each of the seven days.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyProgram {
    days: [DayProgram; 7],
}

impl WeeklyProgram {
    /// A week with the same cell everywhere.
    pub fn uniform(cell: Cell) -> Self {
        Self {
            days: std::array::from_fn(|_| DayProgram::uniform(cell)),
        }
    }

    pub fn day(&self, day: Day) -> &DayProgram {
        &self.days[day.index()]
    }

    pub fn set_day(&mut self, day: Day, program: DayProgram) {
        self.days[day.index()] = program;
    }

    pub fn cell(&self, day: Day, hour: usize, quarter: usize) -> Cell {
        self.days[day.index()].cell(hour, quarter)
    }

    pub fn set_cell(&mut self, day: Day, hour: usize, quarter: usize, cell: Cell) {
        self.days[day.index()].set_cell(hour, quarter, cell);
    }
}

impl Serialize for WeeklyProgram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(7))?;
        for day in Day::ALL {
            map.serialize_entry(day.name(), self.day(day))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WeeklyProgram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, DayProgram>::deserialize(deserializer)?;

        let mut days: [Option<DayProgram>; 7] = Default::default();

        for (key, program) in map {
            let day = Day::parse(&key).ok_or_else(|| de::Error::custom(format!("invalid day name `{key}`")))?;

            if days[day.index()].is_some() {
                return Err(de::Error::custom(format!("duplicate day `{key}`")));
            }

            days[day.index()] = Some(program);
        }

        for day in Day::ALL {
            if days[day.index()].is_none() {
                return Err(de::Error::custom(format!("missing day `{day}`")));
            }
        }

        Ok(Self {
            days: days.map(|d| d.unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_json(quarters: &str) -> String {
        let hours: Vec<String> = (0..24).map(|h| format!("\"h{h:02}\": {quarters}")).collect();
        format!("{{{}}}", hours.join(","))
    }

    #[test]
    fn test_day_parse_names_and_numbers() {
        assert_eq!(Day::parse("monday"), Some(Day::Monday));
        assert_eq!(Day::parse("Sunday"), Some(Day::Sunday));
        assert_eq!(Day::parse("0"), Some(Day::Sunday));
        assert_eq!(Day::parse("7"), Some(Day::Sunday));
        assert_eq!(Day::parse("3"), Some(Day::Wednesday));
        assert_eq!(Day::parse("someday"), None);
    }

    #[test]
    fn test_parse_hour_tolerates_formats() {
        assert_eq!(parse_hour("h00"), Some(0));
        assert_eq!(parse_hour("h7"), Some(7));
        assert_eq!(parse_hour("23"), Some(23));
        assert_eq!(parse_hour("h24"), None);
        assert_eq!(parse_hour("noon"), None);
    }

    #[test]
    fn test_cell_accepts_names_numbers_and_numeric_strings() {
        assert_eq!(
            serde_json::from_str::<Cell>("\"tmax\"").unwrap(),
            Cell::Named(TemperatureName::Tmax)
        );
        assert_eq!(serde_json::from_str::<Cell>("19.5").unwrap(), Cell::Value(19.5));
        assert_eq!(serde_json::from_str::<Cell>("\"19.5\"").unwrap(), Cell::Value(19.5));
        assert!(serde_json::from_str::<Cell>("\"warm\"").is_err());
    }

    #[test]
    fn test_cell_serializes_with_one_decimal() {
        assert_eq!(serde_json::to_string(&Cell::Value(19.5499)).unwrap(), "19.5");
        assert_eq!(serde_json::to_string(&Cell::Named(TemperatureName::T0)).unwrap(), "\"t0\"");
    }

    #[test]
    fn test_day_program_requires_full_grid() {
        let ok: DayProgram = serde_json::from_str(&day_json("[\"t0\", \"t0\", \"tmin\", 21.0]")).unwrap();
        assert_eq!(ok.cell(5, 2), Cell::Named(TemperatureName::Tmin));
        assert_eq!(ok.cell(5, 3), Cell::Value(21.0));

        let three_quarters = day_json("[\"t0\", \"t0\", \"t0\"]");
        assert!(serde_json::from_str::<DayProgram>(&three_quarters).is_err());

        let mut incomplete: BTreeMap<String, Vec<Cell>> = BTreeMap::new();
        incomplete.insert("h00".into(), vec![Cell::Value(20.0); 4]);
        let incomplete = serde_json::to_string(&incomplete).unwrap();
        assert!(serde_json::from_str::<DayProgram>(&incomplete).is_err());
    }

    #[test]
    fn test_weekly_program_requires_all_days() {
        let day = day_json("[\"t0\", \"t0\", \"t0\", \"t0\"]");

        let all: Vec<String> = Day::ALL.iter().map(|d| format!("\"{d}\": {day}")).collect();
        let json = format!("{{{}}}", all.join(","));
        assert!(serde_json::from_str::<WeeklyProgram>(&json).is_ok());

        let six: Vec<String> = Day::ALL[..6].iter().map(|d| format!("\"{d}\": {day}")).collect();
        let json = format!("{{{}}}", six.join(","));
        assert!(serde_json::from_str::<WeeklyProgram>(&json).is_err());
    }

    #[test]
    fn test_weekly_program_roundtrip() {
        let mut program = WeeklyProgram::uniform(Cell::Named(TemperatureName::Tmin));
        program.set_cell(Day::Friday, 18, 3, Cell::Value(22.5));

        let json = serde_json::to_string(&program).unwrap();
        let back: WeeklyProgram = serde_json::from_str(&json).unwrap();

        assert_eq!(back, program);
    }
}
