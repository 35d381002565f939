use std::io::BufRead;

use log::trace;
use noisy_float::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{char, i32, multispace0, space0, u32},
    multi::{count, many0},
    number::complete::double,
    sequence::{delimited, preceded},
    IResult,
};
use particle_id::ParticleID;
use thiserror::Error;

use crate::{
    converter::Converter,
    event::{Event, EventBuilder},
    parsing::{any_entry, double_entry, i32_entry},
};

/// Reader for the records in a (decompressed) Les Houches Event stream
pub struct FileReader {
    source: Box<dyn BufRead>,
}

impl FileReader {
    /// Construct a reader, skipping the header and init block
    pub fn new(mut source: Box<dyn BufRead>) -> Result<Self, std::io::Error> {
        let mut header = Vec::new();
        while !header.ends_with(b"</init>") {
            if source.read_until(b'>', &mut header)? == 0 {
                break;
            }
        }
        Ok(Self { source })
    }

    fn read_record(&mut self) -> Option<Result<String, Error>> {
        let mut record = Vec::new();
        while !record.ends_with(b"</event>") {
            match self.source.read_until(b'>', &mut record) {
                Ok(0) => {
                    return if memmem(&record, b"<event") {
                        Some(Err(Error::IncompleteRecord))
                    } else {
                        None
                    }
                }
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
        let record = match String::from_utf8(record) {
            Ok(record) => record,
            Err(err) => return Some(Err(err.into())),
        };
        trace!("Read Les Houches Event record:\n{record}");
        Some(Ok(record))
    }
}

fn memmem(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

impl Iterator for FileReader {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}

/// Parser for Les Houches Event Format records
pub trait LHEFParser {
    /// Error parsing Les Houches Event Format record
    type Error;

    /// Parse Les Houches Event Format event record
    fn parse_lhef(&self, record: &str) -> Result<Event, Self::Error>;
}

impl LHEFParser for Converter {
    type Error = Error;

    fn parse_lhef(&self, record: &str) -> Result<Event, Self::Error> {
        const STATUS_OUTGOING: i32 = 1;

        let Some(start) = record.find("<event") else {
            return Err(Error::NoEventTag(record.to_owned()));
        };
        let Some(tag_end) = record[start..].find('>') else {
            return Err(Error::NoEventTag(record.to_owned()));
        };
        let body = &record[(start + tag_end + 1)..];
        let (rest, nparticles) = preceded(multispace0, u32)(body)?;
        let nparticles = nparticles as usize;
        let mut event = EventBuilder::with_capacity(nparticles);
        let (rest, _idrup) = any_entry(rest)?;
        let (rest, wt) = double_entry(rest)?;
        event.add_weight(n64(wt));
        let mut lines = rest.lines().skip(1);
        for line in lines.by_ref().take(nparticles) {
            let (rest, id) = preceded(space0, i32)(line)?;
            let id = ParticleID::new(id);
            let (rest, status) = i32_entry(rest)?;
            if status != STATUS_OUTGOING {
                continue;
            }
            // ignore decay parents & colour
            let (rest, _) = count(any_entry, 4)(rest)?;
            let (rest, px) = double_entry(rest)?;
            let (rest, py) = double_entry(rest)?;
            let (rest, pz) = double_entry(rest)?;
            let (_, e) = double_entry(rest)?;
            event.add_outgoing(id, [n64(e), n64(px), n64(py), n64(pz)].into());
        }

        let weight_names = self.weight_names();
        if !weight_names.is_empty() {
            let optional = lines.collect::<Vec<_>>().join("\n");
            let (_, named) = many0(wgt_entry)(&optional)?;
            for name in weight_names {
                let Some((_, wt)) = named.iter().find(|(id, _)| *id == name.as_str())
                else {
                    let available: Vec<_> =
                        named.iter().map(|(id, _)| *id).collect();
                    return Err(Error::WeightNotFound(
                        name.to_owned(),
                        available.join(", "),
                    ));
                };
                event.add_weight(n64(*wt));
            }
        }

        Ok(event.build())
    }
}

/// Les Houches Event Format error
#[derive(Debug, Error)]
pub enum Error {
    /// No event start tag
    #[error("No <event> tag in event record {0}")]
    NoEventTag(String),
    /// Record ended prematurely
    #[error("Incomplete event record at end of input")]
    IncompleteRecord,
    /// Parse error
    #[error("Error parsing entry in event record: {0}")]
    ParseError(String),
    /// I/O error
    #[error("I/O error")]
    IOError(#[from] std::io::Error),
    /// Record is not valid UTF-8
    #[error("Event record is not valid UTF-8")]
    Utf8Error(#[from] std::string::FromUtf8Error),
    /// Weight not found
    #[error("Failed to find weight \"{0}\": Event has weights {1}")]
    WeightNotFound(String, String),
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(source: nom::Err<nom::error::Error<&str>>) -> Self {
        Self::ParseError(source.to_string())
    }
}

// a single `<wgt id='...'> value </wgt>` entry
fn wgt_entry(input: &str) -> IResult<&str, (&str, f64)> {
    let (rest, _) = take_until("<wgt")(input)?;
    let (rest, _) = take_until("id=")(rest)?;
    let (rest, _) = tag("id=")(rest)?;
    let (rest, id) = alt((
        delimited(char('\''), take_until("'"), char('\'')),
        delimited(char('"'), take_until("\""), char('"')),
    ))(rest)?;
    let (rest, _) = take_until(">")(rest)?;
    let (rest, _) = char('>')(rest)?;
    let (rest, wt) = preceded(multispace0, double)(rest)?;
    Ok((rest, (id.trim(), wt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use particle_id::sm_elementary_particles::{electron, gluon};
    use std::io::{BufReader, Cursor};

    const LHEF: &str = "<LesHouchesEvents version=\"3.0\">
<header>
</header>
<init>
2212 2212 6.5e+03 6.5e+03 0 0 0 0 3 1
1.0e+00 1.0e-02 1.0e+00 1
</init>
<event>
 4 1 +2.0e+00 9.1e+01 7.5e-03 1.2e-01
 21 -1 0 0 501 502 0 0 +1.0e+02 1.0e+02 0 0 9
 21 -1 0 0 502 501 0 0 -1.0e+02 1.0e+02 0 0 9
 11 1 1 2 0 0 +3.0e+01 0 +4.0e+01 5.0e+01 0 0 9
 21 1 1 2 501 501 -3.0e+01 0 +1.0e+01 3.2e+01 0 0 9
<rwgt>
<wgt id='1001'> +1.5e+00 </wgt>
<wgt id=\"1002\"> -2.0e+00 </wgt>
</rwgt>
</event>
<event npLO=\"1\">
 1 1 -5.0e-01 9.1e+01 7.5e-03 1.2e-01
 -11 1 1 2 0 0 +1.0e+01 0 0 1.0e+01 0 0 9
<rwgt>
<wgt id='1002'> 3.0 </wgt>
<wgt id='1001'> 4.0 </wgt>
</rwgt>
</event>
</LesHouchesEvents>
";

    fn records() -> Vec<String> {
        let source: Box<dyn BufRead> =
            Box::new(BufReader::new(Cursor::new(LHEF.to_owned())));
        FileReader::new(source)
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn read_and_parse() {
        let records = records();
        assert_eq!(records.len(), 2);

        let converter = Converter::with_weight_names(vec!["1002".to_owned()]);
        let ev = converter.parse_lhef(&records[0]).unwrap();
        assert_eq!(ev.weights.central(), n64(2.));
        assert_eq!(ev.weights.named(0), Some(n64(-2.)));
        assert_eq!(ev.outgoing_with_pid(electron).len(), 1);
        assert_eq!(ev.outgoing_with_pid(electron)[0].pt(), n64(30.));
        // incoming gluons are not outgoing particles
        assert_eq!(ev.outgoing_with_pid(gluon).len(), 1);

        let ev = converter.parse_lhef(&records[1]).unwrap();
        assert_eq!(ev.weights.central(), n64(-0.5));
        assert_eq!(ev.weights.named(0), Some(n64(3.)));
    }

    #[test]
    fn missing_weight() {
        let records = records();
        let converter = Converter::with_weight_names(vec!["2001".to_owned()]);
        assert!(matches!(
            converter.parse_lhef(&records[0]),
            Err(Error::WeightNotFound(..))
        ));
    }

    #[test]
    fn truncated() {
        let truncated = &LHEF[..LHEF.find("<rwgt>").unwrap()];
        let source: Box<dyn BufRead> =
            Box::new(BufReader::new(Cursor::new(truncated.to_owned())));
        let mut reader = FileReader::new(source).unwrap();
        assert!(matches!(reader.next(), Some(Err(Error::IncompleteRecord))));
    }
}
