//! Apple authentication endpoints for the international and China regions.

use crate::types::Domain;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_root: &'static str,
    pub auth: &'static str,
    pub home: &'static str,
    pub setup: &'static str,
}

impl Endpoints {
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Com => Self {
                auth_root: "https://idmsa.apple.com",
                auth: "https://idmsa.apple.com/appleauth/auth",
                home: "https://www.icloud.com",
                setup: "https://setup.icloud.com/setup/ws/1",
            },
            Domain::Cn => Self {
                auth_root: "https://idmsa.apple.com.cn",
                auth: "https://idmsa.apple.com.cn/appleauth/auth",
                home: "https://www.icloud.com.cn",
                setup: "https://setup.icloud.com.cn/setup/ws/1",
            },
        }
    }

    pub fn signin_init(&self) -> String {
        format!("{}/signin/init", self.auth)
    }

    pub fn signin_complete(&self) -> String {
        format!("{}/signin/complete?isRememberMeEnabled=true", self.auth)
    }

    pub fn repair_complete(&self) -> String {
        format!("{}/repair/complete", self.auth)
    }

    pub fn verify_security_code(&self) -> String {
        format!("{}/verify/trusteddevice/securitycode", self.auth)
    }

    pub fn trust(&self) -> String {
        format!("{}/2sv/trust", self.auth)
    }

    pub fn account_login(&self) -> String {
        format!("{}/accountLogin", self.setup)
    }

    pub fn validate(&self) -> String {
        format!("{}/validate", self.setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_endpoints() {
        let ep = Endpoints::for_domain(Domain::Com);
        assert_eq!(ep.home, "https://www.icloud.com");
        assert_eq!(
            ep.signin_complete(),
            "https://idmsa.apple.com/appleauth/auth/signin/complete?isRememberMeEnabled=true"
        );
        assert_eq!(
            ep.account_login(),
            "https://setup.icloud.com/setup/ws/1/accountLogin"
        );
    }

    #[test]
    fn test_cn_endpoints() {
        let ep = Endpoints::for_domain(Domain::Cn);
        assert_eq!(ep.auth_root, "https://idmsa.apple.com.cn");
        assert_eq!(ep.validate(), "https://setup.icloud.com.cn/setup/ws/1/validate");
        assert_eq!(
            ep.verify_security_code(),
            "https://idmsa.apple.com.cn/appleauth/auth/verify/trusteddevice/securitycode"
        );
    }
}
