//! Typed fields in frame payloads.
//!
//! A [`Field`] describes where a value lives in the data block of a frame and
//! how its octets are interpreted. Decoding is pure, except for
//! [`Layout::Aggregated`] fields, which keep running statistics of every value
//! they decode.
//!
//! ```
//! use emsbus_proto::field::{Field, Layout, Value};
//!
//! // A flow temperature in tenths of a degree at offset 1
//! let mut flow = Field::new(1, Layout::Numeric { width: 2, divisor: 10 }).unwrap();
//! assert_eq!(flow.decode(&[0x00, 0x02, 0x1c]).unwrap(), Value::Decimal(54.0));
//! assert_eq!(flow.encode(&Value::Decimal(54.0)).unwrap().as_slice(), &[0x02, 0x1c]);
//! ```

use arrayvec::ArrayVec;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use core::convert::TryFrom;
use core::fmt;
use snafu::{ensure, OptionExt, Snafu};

use crate::frame::{Frame, MAX_FRAME};

/// Widest field.
pub const MAX_WIDTH: usize = MAX_FRAME;

/// Encoded field octets.
pub type FieldBytes = ArrayVec<u8, MAX_WIDTH>;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The octets don't satisfy the constraints of the field type.
    #[snafu(display("Malformed field at offset {}: {}", offset, reason))]
    MalformedField { offset: usize, reason: &'static str },
    /// The value can't be represented in the field.
    #[snafu(display("Value out of range for field at offset {}", offset))]
    OutOfRange { offset: usize },
    /// The span isn't present in the data block.
    #[snafu(display("Field at offset {} of width {} not in data block of {} octets", offset, width, len))]
    Unavailable { offset: usize, width: usize, len: usize },
    /// The descriptor itself is unusable.
    #[snafu(display("Invalid field descriptor: {}", reason))]
    InvalidDescriptor { reason: &'static str },
    /// The value variant doesn't belong to the field type.
    #[snafu(display("Value does not match field type at offset {}", offset))]
    TypeMismatch { offset: usize },
}

/// Interpretation of the octets of a field.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Layout {
    /// Printable 7-bit ASCII, one character per octet.
    Ascii { width: usize },
    /// Six octets of date and time.
    Timestamp,
    /// One bit of one octet.
    Flag { bit: u8 },
    /// Big-endian two's complement integer, divided by `divisor`.
    Numeric { width: usize, divisor: u32 },
    /// Like `Numeric`, keeping running statistics.
    Aggregated { width: usize, divisor: u32 },
    /// One bit of one octet, as [`Switch`].
    Switch { bit: u8 },
    /// Two octets, major and minor.
    Version,
}

impl Layout {
    /// Number of octets the field occupies.
    pub const fn width(&self) -> usize {
        match *self {
            Layout::Ascii { width }
            | Layout::Numeric { width, .. }
            | Layout::Aggregated { width, .. } => width,
            Layout::Timestamp => 6,
            Layout::Flag { .. } | Layout::Switch { .. } => 1,
            Layout::Version => 2,
        }
    }
}

/// Calendar date and time as broadcast by a thermostat.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    /// The calendar date and time, `None` if it doesn't exist.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
    }

    /// Only years 2000 to 2255 fit the year octet.
    fn is_valid(&self) -> bool {
        (2000..=2255).contains(&self.year) && self.to_datetime().is_some()
    }
}

impl TryFrom<NaiveDateTime> for Timestamp {
    type Error = Error;

    /// Fails with [`Error::OutOfRange`] outside the years 2000 to 2255.
    fn try_from(dt: NaiveDateTime) -> Result<Self, Error> {
        let year = u16::try_from(dt.year())
            .ok()
            .filter(|year| (2000..=2255).contains(year))
            .context(OutOfRangeSnafu { offset: 0usize })?;
        Ok(Self {
            year,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Switch {
    On,
    Off,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Switch::On => "On",
            Switch::Off => "Off",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Timestamp(Timestamp),
    Flag(bool),
    /// A numeric field with divisor 1.
    Integer(i64),
    /// A numeric field with a divisor other than 1.
    Decimal(f64),
    Switch(Switch),
    Version(Version),
    /// The sensor behind a numeric field isn't connected.
    Missing,
}

impl Value {
    /// The numeric value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Integer(i) => Some(i as f64),
            Value::Decimal(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::Flag(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Switch(s) => write!(f, "{}", s),
            Value::Version(v) => write!(f, "{}", v),
            Value::Missing => f.write_str("-"),
        }
    }
}

/// Running statistics of an aggregated field.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Aggregate {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Aggregate {
    /// Fold one sample in, using Welford's update for mean and variance.
    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = sample;
            self.max = sample;
            self.mean = sample;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        self.sampled(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        self.sampled(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        self.sampled(self.mean)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        self.sampled(self.m2 / self.count as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn sampled(&self, v: f64) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(v)
        }
    }
}

/// A field descriptor: where a value lives in a data block and how to read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    offset: usize,
    layout: Layout,
    aggregate: Aggregate,
}

impl Field {
    /// Create a field at register `offset`.
    /// # Errors
    /// [`Error::InvalidDescriptor`] for a zero divisor, a bit index above 7, a
    /// numeric width outside 1..=4 or an ASCII width outside 1..=[`MAX_WIDTH`].
    pub fn new(offset: usize, layout: Layout) -> Result<Self, Error> {
        match layout {
            Layout::Numeric { width, divisor } | Layout::Aggregated { width, divisor } => {
                ensure!(
                    (1..=4).contains(&width),
                    InvalidDescriptorSnafu {
                        reason: "numeric width must be 1 to 4 octets"
                    }
                );
                ensure!(
                    divisor != 0,
                    InvalidDescriptorSnafu {
                        reason: "divisor must not be zero"
                    }
                );
            }
            Layout::Flag { bit } | Layout::Switch { bit } => ensure!(
                bit <= 7,
                InvalidDescriptorSnafu {
                    reason: "bit index must be 0 to 7"
                }
            ),
            Layout::Ascii { width } => ensure!(
                (1..=MAX_WIDTH).contains(&width),
                InvalidDescriptorSnafu {
                    reason: "ASCII width out of range"
                }
            ),
            Layout::Timestamp | Layout::Version => {}
        }
        ensure!(
            offset.checked_add(layout.width()).is_some(),
            InvalidDescriptorSnafu {
                reason: "offset out of range"
            }
        );
        Ok(Self {
            offset,
            layout,
            aggregate: Aggregate::default(),
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn width(&self) -> usize {
        self.layout.width()
    }

    /// One past the last register of the field. [`Field::new`] makes sure it fits.
    fn end(&self) -> usize {
        self.offset.saturating_add(self.width())
    }

    /// Running statistics. Always empty for non-aggregated fields.
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// Clear the running statistics.
    pub fn reset_aggregate(&mut self) {
        self.aggregate.reset();
    }

    /// Decode the field from a data block whose first octet is register 0.
    /// # Errors
    /// [`Error::Unavailable`] if the block is too short, [`Error::MalformedField`]
    /// if the octets violate the field type.
    pub fn decode(&mut self, block: &[u8]) -> Result<Value, Error> {
        let span = self.span(block)?;
        let value = self.decode_span(span)?;
        if let (Layout::Aggregated { .. }, Some(sample)) = (self.layout, value.as_f64()) {
            self.aggregate.update(sample);
        }
        Ok(value)
    }

    /// Decode the field from a received frame.
    ///
    /// EMS data frames carry a window of a register block, starting at the
    /// frame's offset octet. Returns `Ok(None)` if the field lies outside the window.
    pub fn extract(&mut self, frame: &Frame) -> Result<Option<Value>, Error> {
        let start = match frame.offset() {
            Some(start) => usize::from(start),
            None => return Ok(None),
        };
        let data = frame.data();
        if self.offset < start || self.end() > start + data.len() {
            return Ok(None);
        }
        let mut shifted = self.clone();
        shifted.offset -= start;
        let value = shifted.decode(data)?;
        self.aggregate = shifted.aggregate;
        Ok(Some(value))
    }

    /// Encode a value into the field's octets.
    /// # Errors
    /// [`Error::OutOfRange`] if the value doesn't fit, [`Error::TypeMismatch`]
    /// if the value variant doesn't belong to this field type.
    pub fn encode(&self, value: &Value) -> Result<FieldBytes, Error> {
        let offset = self.offset;
        let mut out = FieldBytes::new();
        match (self.layout, value) {
            (Layout::Ascii { width }, Value::Text(text)) => {
                ensure!(
                    text.len() == width && text.bytes().all(is_printable),
                    OutOfRangeSnafu { offset }
                );
                out.extend(text.bytes());
            }
            (Layout::Timestamp, Value::Timestamp(t)) => {
                ensure!(t.is_valid(), OutOfRangeSnafu { offset });
                out.extend([(t.year - 2000) as u8, t.month, t.hour, t.day, t.minute, t.second].iter().copied());
            }
            (Layout::Flag { bit }, Value::Flag(set)) => out.push(u8::from(*set) << bit),
            (Layout::Switch { bit }, Value::Switch(s)) => out.push(u8::from(*s == Switch::On) << bit),
            (Layout::Numeric { width, divisor }, v) | (Layout::Aggregated { width, divisor }, v) => {
                let raw = match v {
                    Value::Missing if width >= 2 => missing_raw(width),
                    Value::Integer(i) if divisor == 1 => *i,
                    Value::Decimal(d) if divisor != 1 => {
                        let scaled = (d * f64::from(divisor)).round();
                        ensure!(scaled.is_finite(), OutOfRangeSnafu { offset });
                        ensure!(scaled.abs() < 1e15, OutOfRangeSnafu { offset });
                        scaled as i64
                    }
                    _ => return TypeMismatchSnafu { offset }.fail(),
                };
                let bits = 8 * width as u32;
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                ensure!(raw >= min && raw <= max, OutOfRangeSnafu { offset });
                if !matches!(v, Value::Missing) {
                    ensure!(width < 2 || raw != missing_raw(width), OutOfRangeSnafu { offset });
                }
                out.extend(raw.to_be_bytes()[8 - width..].iter().copied());
            }
            (Layout::Version, Value::Version(v)) => {
                out.push(v.major);
                out.push(v.minor);
            }
            _ => return TypeMismatchSnafu { offset }.fail(),
        }
        Ok(out)
    }

    /// Encode a value in place into a data block, leaving other octets (and
    /// other bits of a flag octet) untouched.
    pub fn encode_into(&self, value: &Value, block: &mut [u8]) -> Result<(), Error> {
        let encoded = self.encode(value)?;
        let len = block.len();
        let span = block
            .get_mut(self.offset..self.end())
            .context(UnavailableSnafu {
                offset: self.offset,
                width: self.width(),
                len,
            })?;
        match self.layout {
            Layout::Flag { bit } | Layout::Switch { bit } => {
                span[0] = (span[0] & !(1 << bit)) | encoded[0];
            }
            _ => span.copy_from_slice(&encoded),
        }
        Ok(())
    }

    fn span<'a>(&self, block: &'a [u8]) -> Result<&'a [u8], Error> {
        block
            .get(self.offset..self.end())
            .context(UnavailableSnafu {
                offset: self.offset,
                width: self.width(),
                len: block.len(),
            })
    }

    fn decode_span(&self, span: &[u8]) -> Result<Value, Error> {
        let offset = self.offset;
        Ok(match self.layout {
            Layout::Ascii { .. } => {
                ensure!(
                    span.iter().copied().all(is_printable),
                    MalformedFieldSnafu {
                        offset,
                        reason: "non-printable octet"
                    }
                );
                Value::Text(span.iter().map(|&c| char::from(c)).collect())
            }
            Layout::Timestamp => {
                let t = Timestamp {
                    year: 2000 + u16::from(span[0]),
                    month: span[1],
                    hour: span[2],
                    day: span[3],
                    minute: span[4],
                    second: span[5],
                };
                ensure!(
                    t.is_valid(),
                    MalformedFieldSnafu {
                        offset,
                        reason: "calendar component out of range"
                    }
                );
                Value::Timestamp(t)
            }
            Layout::Flag { bit } => Value::Flag(span[0] & (1 << bit) != 0),
            Layout::Switch { bit } => Value::Switch(if span[0] & (1 << bit) != 0 {
                Switch::On
            } else {
                Switch::Off
            }),
            Layout::Numeric { width, divisor } | Layout::Aggregated { width, divisor } => {
                let raw = span
                    .iter()
                    .fold(0i64, |acc, &octet| (acc << 8) | i64::from(octet));
                // sign-extend from the field width
                let shift = 64 - 8 * width as u32;
                let raw = (raw << shift) >> shift;
                if width >= 2 && raw == missing_raw(width) {
                    Value::Missing
                } else if divisor == 1 {
                    Value::Integer(raw)
                } else {
                    Value::Decimal(raw as f64 / f64::from(divisor))
                }
            }
            Layout::Version => Value::Version(Version {
                major: span[0],
                minor: span[1],
            }),
        })
    }
}

/// Raw value of a disconnected sensor: 0x80 followed by zero octets.
fn missing_raw(width: usize) -> i64 {
    -(1i64 << (8 * width as u32 - 1))
}

fn is_printable(c: u8) -> bool {
    (0x20..=0x7e).contains(&c)
}
