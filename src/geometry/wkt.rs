//! Reader for the well-known-text geometries the annotation server returns.

use thiserror::Error;

use super::{Geometry, Polygon};
use crate::models::AbsPoint;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WktError {
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected '{found}' at offset {offset}, expected {expected}")]
    Unexpected {
        found: char,
        offset: usize,
        expected: &'static str,
    },

    #[error("unknown geometry type '{0}'")]
    UnknownGeometry(String),

    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
}

/// Parse a WKT string. Z/M ordinates are accepted and dropped.
pub fn parse_wkt(text: &str) -> Result<Geometry, WktError> {
    let mut parser = Parser { src: text, pos: 0 };
    let geometry = parser.geometry()?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(geometry),
        Some(c) => Err(parser.unexpected(c, "end of input")),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn unexpected(&self, found: char, expected: &'static str) -> WktError {
        WktError::Unexpected {
            found,
            offset: self.pos,
            expected,
        }
    }

    fn expect(&mut self, wanted: char, expected: &'static str) -> Result<(), WktError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == wanted => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.unexpected(c, expected)),
            None => Err(WktError::UnexpectedEnd { expected }),
        }
    }

    /// Consume `c` if it is the next non-blank character
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn peek_word(&mut self) -> &'a str {
        self.skip_ws();
        let rest = &self.src[self.pos..];
        let end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn word(&mut self) -> Result<&'a str, WktError> {
        let word = self.peek_word();
        if word.is_empty() {
            return match self.peek() {
                Some(c) => Err(self.unexpected(c, "geometry type")),
                None => Err(WktError::UnexpectedEnd {
                    expected: "geometry type",
                }),
            };
        }
        self.pos += word.len();
        Ok(word)
    }

    fn geometry(&mut self) -> Result<Geometry, WktError> {
        let tag = self.word()?.to_ascii_uppercase();

        let marker = self.peek_word();
        if ["Z", "M", "ZM"].iter().any(|m| marker.eq_ignore_ascii_case(m)) {
            self.pos += marker.len();
        }
        if self.peek_word().eq_ignore_ascii_case("EMPTY") {
            self.pos += "EMPTY".len();
            return Ok(Geometry::Empty);
        }

        match tag.as_str() {
            "POINT" => {
                self.expect('(', "'('")?;
                let point = self.coord()?;
                self.expect(')', "')'")?;
                Ok(Geometry::Point(point))
            }
            "LINESTRING" => Ok(Geometry::LineString(self.coord_seq()?)),
            "POLYGON" => Ok(Geometry::Polygon(self.polygon_body()?)),
            "MULTIPOINT" => Ok(Geometry::MultiPoint(self.list(|p| {
                // both "MULTIPOINT (1 2, 3 4)" and "MULTIPOINT ((1 2), (3 4))" occur
                if p.eat('(') {
                    let point = p.coord()?;
                    p.expect(')', "')'")?;
                    Ok(point)
                } else {
                    p.coord()
                }
            })?)),
            "MULTILINESTRING" => Ok(Geometry::MultiLineString(self.list(|p| p.coord_seq())?)),
            "MULTIPOLYGON" => Ok(Geometry::MultiPolygon(self.list(|p| p.polygon_body())?)),
            "GEOMETRYCOLLECTION" => Ok(Geometry::Collection(self.list(|p| p.geometry())?)),
            _ => Err(WktError::UnknownGeometry(tag)),
        }
    }

    /// `( item, item, ... )`
    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, WktError>,
    ) -> Result<Vec<T>, WktError> {
        self.expect('(', "'('")?;
        let mut items = vec![item(self)?];
        while self.eat(',') {
            items.push(item(self)?);
        }
        self.expect(')', "',' or ')'")?;
        Ok(items)
    }

    fn coord_seq(&mut self) -> Result<Vec<AbsPoint>, WktError> {
        self.list(|p| p.coord())
    }

    fn polygon_body(&mut self) -> Result<Polygon, WktError> {
        let mut rings = self.list(|p| p.coord_seq())?.into_iter();
        let exterior = rings.next().unwrap_or_default();
        Ok(Polygon {
            exterior,
            interiors: rings.collect(),
        })
    }

    fn coord(&mut self) -> Result<AbsPoint, WktError> {
        let x = self.number()?;
        let y = self.number()?;
        // optional z and m
        for _ in 0..2 {
            self.skip_ws();
            if self.peek().is_some_and(starts_number) {
                self.number()?;
            }
        }
        Ok(AbsPoint::new(x, y))
    }

    fn number(&mut self) -> Result<f64, WktError> {
        self.skip_ws();
        let start = self.pos;
        let rest = &self.src[start..];
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
            .unwrap_or(rest.len());
        if len == 0 {
            return match self.peek() {
                Some(c) => Err(self.unexpected(c, "coordinate")),
                None => Err(WktError::UnexpectedEnd {
                    expected: "coordinate",
                }),
            };
        }
        let text = &rest[..len];
        let value = text.parse::<f64>().map_err(|_| WktError::InvalidNumber {
            text: text.to_string(),
            offset: start,
        })?;
        self.pos += len;
        Ok(value)
    }
}

fn starts_number(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
}
