//! Record model and wire mapping.
//!
//! Record sets travel as JSON arrays of [`DnsRecord`] descriptors, both on
//! the bus and inside the store. This module converts descriptors to typed
//! resource records and owns the store key encoding.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hickory_proto::rr::rdata;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::name::to_lower_fqdn;

/// RR types this server stores and serves.
pub const SUPPORTED_TYPES: [RecordType; 8] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::SOA,
    RecordType::TXT,
    RecordType::PTR,
];

/// Informational metadata attached to a record by its producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    /// When the producer emitted the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Identity of the producing system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

/// One resource record in its canonical presentation shape.
///
/// `content` holds the rdata presentation form: `"1.2.3.4"` for A,
/// `"target.example."` for CNAME, the 7-field string for SOA, and so on.
/// `priority` is meaningful for MX only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DnsRecord {
    /// Owner name.
    pub name: String,
    /// RR type mnemonic, upper-case (`A`, `CNAME`, ...).
    #[serde(rename = "Type")]
    pub rtype: String,
    /// Rdata in presentation form.
    pub content: String,
    /// Time to live in seconds.
    pub ttl: u32,
    /// MX preference; zero for other types.
    #[serde(default)]
    pub priority: u16,
    /// Optional producer metadata.
    #[serde(
        rename = "Metadatas",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<Metadata>,
}

impl DnsRecord {
    /// Shorthand constructor used by the local-records loader and tests.
    pub fn new(name: &str, rtype: &str, content: &str, ttl: u32, priority: u16) -> Self {
        Self {
            name: name.to_string(),
            rtype: rtype.to_string(),
            content: content.to_string(),
            ttl,
            priority,
            metadata: None,
        }
    }

    /// The parsed RR type, or `MalformedRecord` for unknown mnemonics.
    pub fn record_type(&self) -> Result<RecordType, Error> {
        let rtype = RecordType::from_str(&self.rtype)
            .map_err(|_| Error::MalformedRecord(format!("unknown record type {}", self.rtype)))?;

        if SUPPORTED_TYPES.contains(&rtype) {
            Ok(rtype)
        } else {
            Err(Error::MalformedRecord(format!(
                "unsupported record type {} for {}",
                self.rtype, self.name
            )))
        }
    }

    /// Render this descriptor as a typed resource record.
    pub fn to_rr(&self) -> Result<Record, Error> {
        let owner = Name::from_ascii(to_lower_fqdn(&self.name))?;
        let rtype = self.record_type()?;
        let content = self.content.trim();

        let rdata = match rtype {
            RecordType::A => {
                let addr: Ipv4Addr = content
                    .parse()
                    .map_err(|_| malformed("A", &self.name, content))?;
                RData::A(rdata::A::from(addr))
            }
            RecordType::AAAA => {
                let addr: Ipv6Addr = content
                    .parse()
                    .map_err(|_| malformed("AAAA", &self.name, content))?;
                RData::AAAA(rdata::AAAA::from(addr))
            }
            RecordType::CNAME => RData::CNAME(rdata::CNAME(Name::from_ascii(content)?)),
            RecordType::NS => RData::NS(rdata::NS(Name::from_ascii(content)?)),
            RecordType::PTR => RData::PTR(rdata::PTR(Name::from_ascii(content)?)),
            RecordType::TXT => RData::TXT(rdata::TXT::new(vec![content.to_string()])),
            RecordType::MX => {
                RData::MX(rdata::MX::new(self.priority, Name::from_ascii(content)?))
            }
            RecordType::SOA => RData::SOA(parse_soa(&self.name, content)?),
            other => {
                return Err(Error::MalformedRecord(format!(
                    "unsupported record type {other} for {}",
                    self.name
                )))
            }
        };

        let mut record = Record::from_rdata(owner, self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        Ok(record)
    }

    /// The presentation line of this record, used in logs.
    pub fn presentation(&self) -> String {
        if self.priority > 0 {
            format!(
                "{} {} IN {} {} {}",
                self.name, self.ttl, self.rtype, self.priority, self.content
            )
        } else {
            format!("{} {} IN {} {}", self.name, self.ttl, self.rtype, self.content)
        }
    }
}

fn malformed(rtype: &str, name: &str, content: &str) -> Error {
    Error::MalformedRecord(format!("bad {rtype} rdata for {name}: {content:?}"))
}

/// Parse the 7-field SOA presentation:
/// `<mname> <rname> <serial> <refresh> <retry> <expire> <minimum>`.
fn parse_soa(name: &str, content: &str) -> Result<rdata::SOA, Error> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() != 7 {
        return Err(Error::MalformedRecord(format!(
            "bad SOA rdata for {name}: expected 7 fields, got {}",
            fields.len()
        )));
    }

    let num = |idx: usize| -> Result<i64, Error> {
        fields[idx]
            .parse()
            .map_err(|_| malformed("SOA", name, content))
    };

    Ok(rdata::SOA::new(
        Name::from_ascii(fields[0])?,
        Name::from_ascii(fields[1])?,
        num(2)? as u32,
        num(3)? as i32,
        num(4)? as i32,
        num(5)? as i32,
        num(6)? as u32,
    ))
}

/// Render a list of descriptors, dropping nothing: any bad entry fails the
/// whole set so a partially-converted record set is never served.
pub fn to_rrs(records: &[DnsRecord]) -> Result<Vec<Record>, Error> {
    records.iter().map(DnsRecord::to_rr).collect()
}

/// Structural equality between two descriptors, ignoring TTL and metadata.
pub fn is_duplicate(a: &DnsRecord, b: &DnsRecord) -> bool {
    to_lower_fqdn(&a.name) == to_lower_fqdn(&b.name)
        && a.rtype.eq_ignore_ascii_case(&b.rtype)
        && a.content == b.content
        && a.priority == b.priority
}

/// Whether two record sets are structurally equal, element by element.
pub fn same_record_set(old: &[DnsRecord], new: &[DnsRecord]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(a, b)| is_duplicate(a, b))
}

/// The store key for `(owner, rtype)`: lower-case FQDN + `|` + mnemonic.
pub fn record_key(owner: &str, rtype: RecordType) -> Vec<u8> {
    format!("{}|{}", to_lower_fqdn(owner), rtype).into_bytes()
}

/// The prefix under which all of an owner's keys sort: `owner.|`.
pub fn owner_prefix(owner: &str) -> Vec<u8> {
    format!("{}|", to_lower_fqdn(owner)).into_bytes()
}

/// Split a store key back into `(owner, rtype)`.
pub fn parse_key(key: &[u8]) -> Option<(String, RecordType)> {
    let key = std::str::from_utf8(key).ok()?;
    let (owner, rtype) = key.rsplit_once('|')?;
    Some((owner.to_string(), RecordType::from_str(rtype).ok()?))
}

/// Parse one `local_records` line:
/// `<name> <ttl> IN <type> [priority] <content>`.
///
/// The priority field is only consumed for MX records, matching the
/// presentation format emitted by [`DnsRecord::presentation`].
pub fn parse_zone_line(line: &str) -> Result<DnsRecord, Error> {
    let bad = || Error::MalformedRecord(format!("bad record line: {line:?}"));

    let mut fields = line.split_whitespace();
    let name = fields.next().ok_or_else(bad)?;
    let ttl: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let class = fields.next().ok_or_else(bad)?;
    if !class.eq_ignore_ascii_case("IN") {
        return Err(bad());
    }
    let rtype = fields.next().ok_or_else(bad)?.to_ascii_uppercase();

    let rest: Vec<&str> = fields.collect();
    let (priority, content) = if rtype == "MX" {
        let (first, target) = rest.split_first().ok_or_else(bad)?;
        let priority: u16 = first.parse().map_err(|_| bad())?;
        (priority, target.join(" "))
    } else {
        (0, rest.join(" "))
    };

    if content.is_empty() {
        return Err(bad());
    }

    let record = DnsRecord::new(name, &rtype, &content, ttl, priority);
    record.record_type()?;
    Ok(record)
}
