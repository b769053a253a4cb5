/// HTTP endpoint paths of the build service.
pub mod endpoints {
    pub const LINK: &str = "/v1/link";
    pub const RELINK: &str = "/v1/relink";
    pub const TEST: &str = "/v1/test";
    pub const PUBLISH: &str = "/v1/publish";
    pub const AVAILABILITY: &str = "/v1/availability";
}

/// Header names understood by the build service's balancer.
pub mod headers {
    /// Sticky routing hint, set by the client.
    pub const ROUTING_HINT: &str = "routing-hint";
    /// Host that served the request, read back from responses.
    pub const CHOSEN_HOST: &str = "chosen-host";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Content types of request bodies.
pub mod content_types {
    pub const PACKAGE: &str = "application/vnd.bsync.package";
    pub const RELINK: &str = "application/vnd.bsync.relink";
    pub const JSON: &str = "application/json";
}

/// Query parameter names.
pub mod params {
    pub const PROJECT: &str = "project";
    pub const FILTER: &str = "filter";
    pub const TAG: &str = "tag";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        assert_eq!(endpoints::LINK, "/v1/link");
        assert_eq!(endpoints::RELINK, "/v1/relink");
        assert_eq!(endpoints::AVAILABILITY, "/v1/availability");
    }

    #[test]
    fn header_names_are_lowercase() {
        for name in [headers::ROUTING_HINT, headers::CHOSEN_HOST, headers::CONTENT_TYPE] {
            assert_eq!(name, name.to_ascii_lowercase());
        }
    }
}
