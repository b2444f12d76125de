//! Best-effort observation extraction from acquisition source lines
//!
//! Both acquisition sources emit unstructured text; the extractors here turn
//! one raw line into zero or one (domain, addresses) observation. Extraction
//! is total: every input maps to an `Observation`, possibly empty, and never
//! to a panic or error that could take down the pipeline. Real sample lines
//! are kept as test fixtures since this surface regresses easily.

use crate::error::Result;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One extraction result: the queried domain (when it could be isolated)
/// and every resolved address found on the line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub domain: Option<String>,
    pub addresses: Vec<String>,
}

impl Observation {
    pub fn empty() -> Self {
        Self::default()
    }

    /// An observation is usable only with both a domain and addresses;
    /// anything else is dropped upstream.
    pub fn is_complete(&self) -> bool {
        self.domain.is_some() && !self.addresses.is_empty()
    }
}

/// Contract shared by both acquisition variants
pub trait LineExtractor: Send {
    fn extract(&self, line: &str) -> Observation;
}

/// Extractor for verbose resolver reply logs.
///
/// Matches lines carrying a "reply" marker; the first field after the marker
/// is taken as the queried domain and the first address-parseable token in
/// the remainder as a single resolved address. The exact column layout is
/// not guaranteed, so extraction is best-effort.
pub struct ResolverLogExtractor {
    reply: Regex,
}

impl ResolverLogExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reply: Regex::new(r"(?i)\breply:?\s+(\S+)\s+(.*)$")?,
        })
    }
}

impl LineExtractor for ResolverLogExtractor {
    fn extract(&self, line: &str) -> Observation {
        let Some(caps) = self.reply.captures(line) else {
            return Observation::empty();
        };

        let domain = caps.get(1).map(|m| m.as_str().to_string());
        let address = caps
            .get(2)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split_whitespace()
            .find_map(|token| token.parse::<IpAddr>().ok());

        match (domain, address) {
            (Some(domain), Some(addr)) => Observation {
                domain: Some(domain),
                addresses: vec![addr.to_string()],
            },
            _ => Observation::empty(),
        }
    }
}

/// Extractor for verbose packet-capture output.
///
/// Expected line shape (tcpdump -l -n -v):
///
/// `127.0.0.1.53 > 127.0.0.1.48562: 65258 3/0/0 portal.discover.com. CNAME
///  portal.discover.com.edgekey.net., e14577.x.akamaiedge.net. A
///  23.196.238.175 (132)`
pub struct CaptureLineExtractor {
    ipv4: Regex,
    ipv6: Regex,
    answer_name: Regex,
    name_before_record: Regex,
}

impl CaptureLineExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ipv4: Regex::new(r"\bA\s+(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})")?,
            ipv6: Regex::new(r"\bAAAA\s+([0-9a-fA-F:]+)")?,
            // Queried name right after the answer-count triple, e.g.
            // "3/0/0 portal.discover.com."
            answer_name: Regex::new(
                r"\d+/\d+/\d+\s+([a-zA-Z0-9][-a-zA-Z0-9]*(?:\.[a-zA-Z0-9][-a-zA-Z0-9]*)+)\.",
            )?,
            // Fallback: first dotted hostname immediately preceding a
            // record-type marker anywhere in the line.
            name_before_record: Regex::new(
                r"\b((?:[a-zA-Z0-9][-a-zA-Z0-9]*\.)+[a-zA-Z]{2,})\.?\s+(?:A|AAAA|CNAME)\b",
            )?,
        })
    }

    fn collect_addresses(&self, line: &str) -> Vec<String> {
        let mut addresses = Vec::new();

        for caps in self.ipv4.captures_iter(line) {
            if let Some(m) = caps.get(1) {
                if let Ok(addr) = m.as_str().parse::<Ipv4Addr>() {
                    addresses.push(addr.to_string());
                }
            }
        }
        for caps in self.ipv6.captures_iter(line) {
            if let Some(m) = caps.get(1) {
                if let Ok(addr) = m.as_str().parse::<Ipv6Addr>() {
                    addresses.push(addr.to_string());
                }
            }
        }

        addresses
    }

    fn recover_domain(&self, line: &str) -> Option<String> {
        if let Some(caps) = self.answer_name.captures(line) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
        self.name_before_record
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl LineExtractor for CaptureLineExtractor {
    fn extract(&self, line: &str) -> Observation {
        // Responses come FROM port 53; everything else is query traffic.
        if !line.contains(".53 >") {
            return Observation::empty();
        }

        let addresses = self.collect_addresses(line);
        if addresses.is_empty() {
            return Observation::empty();
        }

        // Without a recovered domain the addresses cannot be attributed, so
        // the whole observation is dropped; precision over completeness.
        let Some(domain) = self.recover_domain(line) else {
            return Observation::empty();
        };

        Observation {
            domain: Some(domain),
            addresses,
        }
    }
}
