//! Client metadata stored on session rows.
//!
//! Everything here is best-effort telemetry for the "your devices" list and
//! audits. It must never decide whether a request is allowed.

use actix_web::HttpRequest;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
        }
    }
}

/// What a classifier could tell from a user-agent string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientProfile {
    pub device: Option<DeviceClass>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub platform: Option<String>,
}

pub trait ClientClassifier: Send + Sync {
    fn classify(&self, user_agent: &str) -> ClientProfile;
}

/// Ordered, case-insensitive regex tests over the user-agent string.
pub struct UserAgentClassifier {
    tablet: Regex,
    mobile: Regex,
    android: Regex,
    edge: Regex,
    chrome: Regex,
    firefox: Regex,
    safari: Regex,
    windows: Regex,
    ios: Regex,
    macos: Regex,
    android_os: Regex,
    linux: Regex,
}

impl UserAgentClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(UserAgentClassifier {
            tablet: Regex::new(r"(?i)ipad|tablet|kindle|silk|playbook")?,
            mobile: Regex::new(r"(?i)mobile|iphone|ipod|blackberry|opera mini|iemobile")?,
            android: Regex::new(r"(?i)android")?,
            edge: Regex::new(r"(?i)\bedg(?:e|a|ios)?/(\d+)")?,
            chrome: Regex::new(r"(?i)(?:chrome|crios)/(\d+)")?,
            firefox: Regex::new(r"(?i)(?:firefox|fxios)/(\d+)")?,
            safari: Regex::new(r"(?i)version/(\d+).*safari")?,
            windows: Regex::new(r"(?i)windows nt (\d+\.\d+)")?,
            ios: Regex::new(r"(?i)(?:iphone|ipad|ipod).*? os (\d+[._]\d+)")?,
            macos: Regex::new(r"(?i)mac os x (\d+[._]\d+(?:[._]\d+)?)")?,
            android_os: Regex::new(r"(?i)android (\d+(?:\.\d+)?)")?,
            linux: Regex::new(r"(?i)linux")?,
        })
    }

    fn device(&self, ua: &str) -> DeviceClass {
        if self.tablet.is_match(ua) {
            DeviceClass::Tablet
        } else if self.mobile.is_match(ua) {
            DeviceClass::Mobile
        } else if self.android.is_match(ua) {
            // Android without "Mobile" is a tablet
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }

    fn browser(&self, ua: &str) -> Option<(&'static str, String)> {
        let major = |re: &Regex| {
            re.captures(ua)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        // Edge also advertises Chrome and Safari, Chrome also advertises Safari
        if !self.edge.is_match(ua) {
            if let Some(version) = major(&self.chrome) {
                return Some(("Chrome", version));
            }
        }
        if let Some(version) = major(&self.firefox) {
            return Some(("Firefox", version));
        }
        if !self.chrome.is_match(ua) && !self.edge.is_match(ua) {
            if let Some(version) = major(&self.safari) {
                return Some(("Safari", version));
            }
        }
        major(&self.edge).map(|version| ("Edge", version))
    }

    fn os(&self, ua: &str) -> Option<(&'static str, Option<String>)> {
        let version = |re: &Regex| {
            re.captures(ua)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().replace('_', "."))
        };

        if let Some(v) = version(&self.windows) {
            return Some(("Windows", Some(v)));
        }
        // iOS user agents say "like Mac OS X", test them first
        if let Some(v) = version(&self.ios) {
            return Some(("iOS", Some(v)));
        }
        if let Some(v) = version(&self.macos) {
            return Some(("macOS", Some(v)));
        }
        // Android user agents also contain "Linux"
        if self.android.is_match(ua) {
            return Some(("Android", version(&self.android_os)));
        }
        if self.linux.is_match(ua) {
            return Some(("Linux", None));
        }
        None
    }
}

impl ClientClassifier for UserAgentClassifier {
    fn classify(&self, user_agent: &str) -> ClientProfile {
        if user_agent.trim().is_empty() {
            return ClientProfile::default();
        }

        let (browser, browser_version) = match self.browser(user_agent) {
            Some((name, version)) => (Some(name.to_string()), Some(version)),
            None => (None, None),
        };
        let (os, os_version) = match self.os(user_agent) {
            Some((name, version)) => (Some(name.to_string()), version),
            None => (None, None),
        };

        ClientProfile {
            device: Some(self.device(user_agent)),
            browser,
            browser_version,
            os,
            os_version,
        }
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer address.
pub fn client_ip(req: &HttpRequest) -> Option<String> {
    header(req, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header(req, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
}

pub fn extract_session_info(req: &HttpRequest, classifier: &dyn ClientClassifier) -> SessionInfo {
    let user_agent = header(req, "user-agent").map(str::to_string);
    let profile = user_agent
        .as_deref()
        .map(|ua| classifier.classify(ua))
        .unwrap_or_default();

    let platform = header(req, "sec-ch-ua-platform")
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| profile.os.clone());

    SessionInfo {
        ip_address: client_ip(req),
        user_agent,
        device: profile.device.map(|d| d.as_str().to_string()),
        browser: profile.browser,
        browser_version: profile.browser_version,
        os: profile.os,
        os_version: profile.os_version,
        platform,
    }
}
