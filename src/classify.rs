/// Ports that almost always speak TLS-wrapped HTTP.
const HTTPS_PORTS: &[u16] = &[443, 8443];

/// Ports commonly used by plain-HTTP admin UIs and dev servers.
const HTTP_PORTS: &[u16] = &[80, 8080, 8000, 3000, 5000, 8081];

/// Above this, an unrecognised port is still worth an HTTP probe.
const GENEROUS_PROBE_FLOOR: u16 = 1000;

/// What to do with an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePlan {
    Skip,
    Http,
    Https,
}

impl ProbePlan {
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            ProbePlan::Skip => None,
            ProbePlan::Http => Some("http"),
            ProbePlan::Https => Some("https"),
        }
    }
}

/// Decide whether an open port is worth a web probe and with which scheme.
///
/// Over-approximates on purpose: anything above port 1000 is tried as HTTP and
/// left to the fetcher's content checks to reject.
pub fn classify(port: u16, announced: &str) -> ProbePlan {
    let name = announced.to_ascii_lowercase();
    if name.contains("https") || name.contains("ssl") || HTTPS_PORTS.contains(&port) {
        return ProbePlan::Https;
    }
    if name.contains("http") || HTTP_PORTS.contains(&port) {
        return ProbePlan::Http;
    }
    if port > GENEROUS_PROBE_FLOOR {
        return ProbePlan::Http;
    }
    ProbePlan::Skip
}
