use std::io::BufRead;

use log::trace;
use noisy_float::prelude::*;
use nom::{multi::count, IResult};
use particle_id::ParticleID;
use thiserror::Error;

use crate::{
    converter::Converter,
    event::{Event, EventBuilder},
    parsing::{any_entry, double_entry, i32_entry, string_entry, u32_entry},
};

/// Reader for the records in a (decompressed) HepMC2 event stream
pub struct FileReader {
    source: Box<dyn BufRead>,
}

impl FileReader {
    /// Construct a reader, skipping everything up to the first event
    pub fn new(source: Box<dyn BufRead>) -> Result<Self, std::io::Error> {
        Ok(Self {
            source: init_source(source)?,
        })
    }

    fn read_record(&mut self) -> Option<Result<String, HepMCError>> {
        let mut record = vec![b'E'];
        while !record.ends_with(b"\nE") {
            match self.source.read_until(b'E', &mut record) {
                Ok(0) => {
                    if record.len() > 1 {
                        // last record, no trailing "E" to remove
                        record.push(b'\n');
                        record.push(b'E');
                        break;
                    } else {
                        return None;
                    }
                }
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
        record.truncate(record.len() - 2);
        let record = match String::from_utf8(record) {
            Ok(record) => record,
            Err(err) => return Some(Err(err.into())),
        };
        trace!("Read HepMC record:\n{record}");
        Some(Ok(record))
    }
}

impl Iterator for FileReader {
    type Item = Result<String, HepMCError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}

fn init_source(
    mut buf: Box<dyn BufRead>,
) -> Result<Box<dyn BufRead>, std::io::Error> {
    // headerless stream starting directly with an event
    if buf.fill_buf()?.starts_with(b"E") {
        buf.consume(1);
        return Ok(buf);
    }
    // read until start of first event
    let mut dump = Vec::new();
    while !dump.ends_with(b"\nE") {
        dump.clear();
        if buf.read_until(b'E', &mut dump)? == 0 {
            break;
        }
    }
    Ok(buf)
}

/// Error reading a HepMC event record
#[derive(Debug, Error)]
pub enum HepMCError {
    /// Parse error
    #[error("Error parsing line in event record: {0}")]
    ParseError(String),
    /// Invalid start of record
    #[error("Record does not start with 'E': {0}")]
    BadRecordStart(String),
    /// Unrecognized entry
    #[error("Line does not correspond to a known entry type: {0}")]
    BadEntry(String),
    /// I/O error
    #[error("I/O error")]
    IOError(#[from] std::io::Error),
    /// Record is not valid UTF-8
    #[error("Event record is not valid UTF-8")]
    Utf8Error(#[from] std::string::FromUtf8Error),
    /// Invalid energy unit
    #[error("Invalid energy unit: {0}")]
    InvalidEnergyUnit(String),
    /// Weight not found
    #[error("Failed to find weight \"{0}\": Event has weights {1}")]
    WeightNotFound(String, String),
}

impl From<nom::Err<nom::error::Error<&str>>> for HepMCError {
    fn from(source: nom::Err<nom::error::Error<&str>>) -> Self {
        Self::ParseError(source.to_string())
    }
}

/// Parser for HepMC event records
pub trait HepMCParser {
    /// Error parsing HepMC event record
    type Error;

    /// Parse HepMC event record
    fn parse_hepmc(&self, record: &str) -> Result<Event, Self::Error>;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
enum EnergyUnit {
    MeV,
    #[default]
    GeV,
}

impl HepMCParser for Converter {
    type Error = HepMCError;

    fn parse_hepmc(&self, mut record: &str) -> Result<Event, Self::Error> {
        let mut event = EventBuilder::new();
        let (weight, weights, rest) = extract_weights(record)?;
        event.add_weight(n64(weight));
        record = rest;

        let mut energy_unit = EnergyUnit::GeV;
        let mut seen_names = false;
        while let Some(pos) = record.find('\n') {
            record = &record[(pos + 1)..];
            match record.as_bytes().first() {
                Some(b'V') | Some(b'F') | Some(b'H') | Some(b'C') => {}
                Some(b'N') => {
                    seen_names = true;
                    record = parse_weight_names_line(
                        self,
                        record,
                        &weights,
                        &mut event,
                    )?
                }
                Some(b'P') => record = parse_particle_line(record, &mut event)?,
                Some(b'U') => (energy_unit, record) = parse_units_line(record)?,
                _ => {
                    if !record.trim().is_empty() {
                        return Err(HepMCError::BadEntry(record.to_owned()));
                    }
                }
            }
        }
        if !seen_names {
            if let Some(name) = self.weight_names().first() {
                return Err(HepMCError::WeightNotFound(
                    name.to_owned(),
                    String::new(),
                ));
            }
        }

        if energy_unit == EnergyUnit::MeV {
            event.rescale_energies(n64(1e-3));
        }
        Ok(event.build())
    }
}

fn parse_units_line(record: &str) -> Result<(EnergyUnit, &str), HepMCError> {
    debug_assert!(record.starts_with('U'));
    let (rest, energy) = any_entry(&record[1..])?;
    let energy = match energy {
        "GEV" => EnergyUnit::GeV,
        "MEV" => EnergyUnit::MeV,
        _ => return Err(HepMCError::InvalidEnergyUnit(energy.to_owned())),
    };
    Ok((energy, rest))
}

fn parse_particle_line<'a>(
    record: &'a str,
    event: &mut EventBuilder,
) -> Result<&'a str, HepMCError> {
    const HEPMC_OUTGOING: i32 = 1;

    debug_assert!(record.starts_with('P'));
    let (rest, _barcode) = any_entry(&record[1..])?;
    let (rest, id) = i32_entry(rest)?;
    let (rest, px) = double_entry(rest)?;
    let (rest, py) = double_entry(rest)?;
    let (rest, pz) = double_entry(rest)?;
    let (rest, e) = double_entry(rest)?;
    let (rest, _m) = any_entry(rest)?;
    let (rest, status) = i32_entry(rest)?;
    if status != HEPMC_OUTGOING {
        return Ok(rest);
    }
    event.add_outgoing(
        ParticleID::new(id),
        [n64(e), n64(px), n64(py), n64(pz)].into(),
    );
    Ok(rest)
}

fn extract_weights(record: &str) -> Result<(f64, Vec<f64>, &str), HepMCError> {
    if !record.starts_with('E') {
        return Err(HepMCError::BadRecordStart(record.to_owned()));
    }
    let (rest, _) = non_weight_entries(record)?;
    let (rest, nweights) = u32_entry(rest)?;
    let (rest, weights) = count(double_entry, nweights as usize)(rest)?;
    let central = weights.first().copied().unwrap_or(1.);
    Ok((central, weights, rest))
}

fn parse_weight_names_line<'a>(
    converter: &Converter,
    mut record: &'a str,
    all_weights: &[f64],
    event: &mut EventBuilder,
) -> Result<&'a str, HepMCError> {
    let weight_names = converter.weight_names();
    if weight_names.is_empty() {
        return Ok(record);
    }
    let (names, nnames) = u32_entry(&record[1..])?;
    record = names;
    let mut found = vec![None; weight_names.len()];
    for i in 0..(nnames as usize) {
        let name;
        (record, name) = string_entry(record)?;
        if let Some(pos) = weight_names.iter().position(|n| n == name) {
            found[pos] = all_weights.get(i).copied();
        }
    }
    for (name, weight) in weight_names.iter().zip(found) {
        let Some(weight) = weight else {
            let line_end = names.find('\n').unwrap_or(names.len());
            return Err(HepMCError::WeightNotFound(
                name.to_owned(),
                names[..line_end].trim().to_owned(),
            ));
        };
        event.add_weight(n64(weight));
    }
    Ok(record)
}

fn non_weight_entries(line: &str) -> IResult<&str, &str> {
    debug_assert!(line.starts_with('E'));
    // ignore first 10 entries
    let (rest, _) = count(any_entry, 10)(&line[1..])?;
    let (rest, nrandom_states) = u32_entry(rest)?;
    // ignore random states
    let (rest, _) = count(any_entry, nrandom_states as usize)(rest)?;
    let (parsed, rest) = line.split_at(line.len() - rest.len());
    Ok((rest, parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use particle_id::sm_elementary_particles::{electron, gluon};
    use std::io::{BufReader, Cursor};

    const RECORDS: &str = "HepMC::Version 2.06.09
HepMC::IO_GenEvent-START_EVENT_LISTING
E 1 -1 -1.0e+00 -1.0e+00 -1.0e+00 0 0 2 1 2 0 3 2.5e+00 1.0e+00 5.0e-01
N 3 \"central\" \"muR=2\" \"muR=0.5\"
U MEV MM
C 1.0e+00 1.0e-02
V -1 0 0 0 0 0 1 2 0
P 1 2212 0 0 6.5e+06 6.5e+06 0 4 0 0 -1 0
P 3 11 3.0e+04 0 4.0e+04 5.0e+04 0 1 0 0 0 0
P 4 21 -3.0e+04 0 1.0e+04 3.2e+04 0 1 0 0 0 0
E 2 -1 -1.0e+00 -1.0e+00 -1.0e+00 0 0 1 1 2 0 3 -1.5e+00 2.0e+00 1.0e+00
N 3 \"central\" \"muR=2\" \"muR=0.5\"
U GEV MM
P 3 -11 10 0 0 10 0 1 0 0 0 0
HepMC::IO_GenEvent-END_EVENT_LISTING
";

    fn reader(s: &str) -> FileReader {
        let source: Box<dyn BufRead> =
            Box::new(BufReader::new(Cursor::new(s.to_owned())));
        FileReader::new(source).unwrap()
    }

    #[test]
    fn read_and_parse() {
        let records: Vec<_> = reader(RECORDS).map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.starts_with("E ")));

        let converter = Converter::with_weight_names(vec!["muR=0.5".to_owned()]);
        let ev = converter.parse_hepmc(&records[0]).unwrap();
        assert_eq!(ev.weights.central(), n64(2.5));
        assert_eq!(ev.weights.named(0), Some(n64(0.5)));
        let e = ev.outgoing_with_pid(electron);
        assert_eq!(e.len(), 1);
        // MeV -> GeV
        assert_eq!(e[0].pt(), n64(30.));
        assert_eq!(ev.outgoing_with_pid(gluon).len(), 1);

        let ev = converter.parse_hepmc(&records[1]).unwrap();
        assert_eq!(ev.weights.central(), n64(-1.5));
        assert_eq!(ev.weights.named(0), Some(n64(1.0)));
        assert_eq!(ev.outgoing_with_pid(ParticleID::new(-11)).len(), 1);
    }

    #[test]
    fn missing_weight() {
        let records: Vec<_> = reader(RECORDS).map(|r| r.unwrap()).collect();
        let converter = Converter::with_weight_names(vec!["nope".to_owned()]);
        assert!(matches!(
            converter.parse_hepmc(&records[0]),
            Err(HepMCError::WeightNotFound(..))
        ));
    }

    #[test]
    fn headerless() {
        let records: Vec<_> =
            reader("E 1 -1 -1 -1 -1 0 0 0 0 0 0 1 1.0\nP 1 22 1 0 0 1 0 1\n")
                .collect();
        assert_eq!(records.len(), 1);
        let ev = Converter::new()
            .parse_hepmc(records[0].as_ref().unwrap())
            .unwrap();
        assert_eq!(ev.weights.central(), n64(1.));
    }
}
