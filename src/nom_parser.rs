use nom::branch::alt;
use nom::bytes::complete::take;
use nom::combinator::{all_consuming, consumed, eof, map, value, verify};
use nom::number::complete::u8;
use nom::error::{Error as NomError, ErrorKind};
use nom::sequence::tuple;
use nom::IResult;

use crate::frame::{Checksum, MAX_FRAME, MIN_FRAME};

type Buf = [u8];

/// What a delimited run of octets (everything between two breaks) turned out to be.
#[derive(PartialEq, Copy, Clone, Debug)]
pub(crate) enum FrameToken<'a> {
    /// Nothing between two breaks.
    Empty,
    /// Poll request, poll reply or write reply.
    Single(u8),
    /// A data frame with a valid checksum. The checksum is not included.
    Data(&'a Buf),
    /// More than one octet, but not enough for a data frame.
    Short(usize),
    TooLong(usize),
    BadChecksum { received: u8, computed: u8 },
}

pub(crate) fn parse_frame(buf: &Buf, checksum: Checksum) -> FrameToken<'_> {
    let parsed: IResult<&Buf, FrameToken<'_>> = alt((
        value(FrameToken::Empty, eof),
        map(all_consuming(u8), FrameToken::Single),
        map(all_consuming(|b| data_frame(checksum, b)), FrameToken::Data),
    ))(buf);

    match parsed {
        Ok((_, token)) => token,
        Err(_) => classify_failure(buf, checksum),
    }
}

/// Header, data and a matching checksum octet.
fn data_frame(checksum: Checksum, buf: &Buf) -> IResult<&Buf, &Buf> {
    let body_len = buf.len().saturating_sub(1);
    if body_len > MAX_FRAME {
        return Err(nom::Err::Error(NomError::new(buf, ErrorKind::TooLarge)));
    }
    let (buf, (body, _)) = consumed(tuple((
        header,
        take(body_len.saturating_sub(MIN_FRAME)),
    )))(buf)?;
    let (buf, _) = verify(u8, |received| checksum.compute(body) == *received)(buf)?;
    Ok((buf, body))
}

/// Source, destination, type and offset.
fn header(buf: &Buf) -> IResult<&Buf, (u8, u8, u8, u8)> {
    tuple((u8, u8, u8, u8))(buf)
}

fn classify_failure(buf: &Buf, checksum: Checksum) -> FrameToken<'_> {
    let len = buf.len();
    if len <= MIN_FRAME {
        FrameToken::Short(len)
    } else if len > MAX_FRAME + 1 {
        FrameToken::TooLong(len)
    } else {
        let (body, received) = buf.split_at(len - 1);
        FrameToken::BadChecksum {
            received: received[0],
            computed: checksum.compute(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(body: &[u8]) -> Vec<u8> {
        let mut v = body.to_vec();
        v.push(Checksum::Ems.compute(body));
        v
    }

    #[test]
    fn test_parse_frame() {
        use FrameToken::*;
        assert_eq!(parse_frame(b"", Checksum::Ems), Empty);
        assert_eq!(parse_frame(&[0x8b], Checksum::Ems), Single(0x8b));
        assert_eq!(parse_frame(&[0x08, 0x0b], Checksum::Ems), Short(2));
        assert_eq!(parse_frame(&[0x08, 0x0b, 0x18, 0x00], Checksum::Ems), Short(4));

        let body = [0x08, 0x0b, 0x18, 0x00, 0x01, 0x02];
        let good = wire(&body);
        assert_eq!(parse_frame(&good, Checksum::Ems), Data(&body[..]));

        // minimal frame: header only, plus checksum
        let minimal = wire(&body[..4]);
        assert_eq!(parse_frame(&minimal, Checksum::Ems), Data(&body[..4]));

        let mut bad = good.clone();
        bad[4] = 0x11;
        assert_eq!(
            parse_frame(&bad, Checksum::Ems),
            BadChecksum {
                received: 0x69,
                computed: Checksum::Ems.compute(&bad[..6])
            }
        );

        let long = wire(&[0x10; 35]);
        assert_eq!(parse_frame(&long, Checksum::Ems), TooLong(36));
    }

    #[test]
    fn test_header() {
        assert_eq!(
            header(&[1, 2, 3, 4, 5]),
            Ok((&[5u8][..], (1, 2, 3, 4)))
        );
        assert!(header(&[1, 2, 3]).is_err());
    }
}
