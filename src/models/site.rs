use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub url: String,
    pub autoplay: bool,
}

/// Editable site texts and settings. Services live in their own table and
/// are joined in when a full [`SiteData`] is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    pub title: String,
    pub nav_logo: String,
    pub hero_title: String,
    pub hero_description: String,
    pub services_title: String,
    pub contact_title: String,
    pub footer_title: String,
    pub footer_description: String,
    pub footer_copyright: String,
    pub theme: String,
    pub audio: AudioSettings,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            title: "Ntando Mods Pro - Professional Modification Services".to_string(),
            nav_logo: "🔧 Ntando Mods Pro".to_string(),
            hero_title: "Professional Modification Services".to_string(),
            hero_description: "Transform your devices and applications with expert modifications"
                .to_string(),
            services_title: "Our Services".to_string(),
            contact_title: "Get In Touch".to_string(),
            footer_title: "🔧 Ntando Mods Pro".to_string(),
            footer_description: "Professional modification services for all your digital needs."
                .to_string(),
            footer_copyright: "© 2024 Ntando Mods Pro. All rights reserved.".to_string(),
            theme: "dark".to_string(),
            audio: AudioSettings {
                url: "background-music.mp3".to_string(),
                autoplay: false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioSettingsUpdate {
    pub url: Option<String>,
    pub autoplay: Option<bool>,
}

/// Typed partial update of [`SiteSettings`]. Only whitelisted fields are
/// accepted; anything else fails deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SiteSettingsUpdate {
    pub title: Option<String>,
    pub nav_logo: Option<String>,
    pub hero_title: Option<String>,
    pub hero_description: Option<String>,
    pub services_title: Option<String>,
    pub contact_title: Option<String>,
    pub footer_title: Option<String>,
    pub footer_description: Option<String>,
    pub footer_copyright: Option<String>,
    pub theme: Option<String>,
    pub audio: Option<AudioSettingsUpdate>,
}

impl SiteSettingsUpdate {
    /// Shallow-merge into `settings`, returning the names of changed fields.
    pub fn apply(self, settings: &mut SiteSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();

        macro_rules! merge {
            ($field:ident, $name:literal) => {
                if let Some(v) = self.$field {
                    settings.$field = v;
                    changed.push($name);
                }
            };
        }

        merge!(title, "title");
        merge!(nav_logo, "navLogo");
        merge!(hero_title, "heroTitle");
        merge!(hero_description, "heroDescription");
        merge!(services_title, "servicesTitle");
        merge!(contact_title, "contactTitle");
        merge!(footer_title, "footerTitle");
        merge!(footer_description, "footerDescription");
        merge!(footer_copyright, "footerCopyright");
        merge!(theme, "theme");

        if let Some(audio) = self.audio {
            if let Some(url) = audio.url {
                settings.audio.url = url;
            }
            if let Some(autoplay) = audio.autoplay {
                settings.audio.autoplay = autoplay;
            }
            changed.push("audio");
        }

        changed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub features: Vec<String>,
    pub price: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Body of `add-service` and the service entries of a restore.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewService {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub price: String,
    #[serde(rename = "type", default = "default_service_kind")]
    pub kind: String,
}

fn default_service_kind() -> String {
    "contact".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub price: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ServiceUpdate {
    pub fn apply(self, service: &mut Service) {
        if let Some(v) = self.name {
            service.name = v;
        }
        if let Some(v) = self.icon {
            service.icon = v;
        }
        if let Some(v) = self.description {
            service.description = v;
        }
        if let Some(v) = self.features {
            service.features = v;
        }
        if let Some(v) = self.price {
            service.price = v;
        }
        if let Some(v) = self.kind {
            service.kind = v;
        }
    }
}

/// Settings plus the service list, as served to the site and the admin UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteData {
    #[serde(flatten)]
    pub settings: SiteSettings,
    pub services: Vec<Service>,
}

/// The four services a fresh store starts with.
pub fn seed_services() -> Vec<NewService> {
    let mk = |id: i64, name: &str, icon: &str, description: &str, features: [&str; 3], price: &str| {
        NewService {
            id: Some(id),
            name: name.to_string(),
            icon: icon.to_string(),
            description: description.to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
            price: price.to_string(),
            kind: default_service_kind(),
        }
    };

    vec![
        mk(
            1,
            "Mobile App Mods",
            "📱",
            "Custom modifications for Android and iOS applications with enhanced features and functionality.",
            ["✓ UI/UX Enhancements", "✓ Feature Additions", "✓ Performance Optimization"],
            "Starting from $299",
        ),
        mk(
            2,
            "Game Modifications",
            "🎮",
            "Professional game modding services for enhanced gaming experiences and custom content.",
            ["✓ Custom Maps & Levels", "✓ Character Modifications", "✓ Gameplay Enhancements"],
            "Starting from $199",
        ),
        mk(
            3,
            "Software Customization",
            "💻",
            "Tailored software solutions and modifications to meet your specific requirements.",
            ["✓ Interface Customization", "✓ Plugin Development", "✓ Integration Solutions"],
            "Starting from $399",
        ),
        mk(
            4,
            "Security Audits",
            "🛡️",
            "Comprehensive security analysis and vulnerability assessments for your applications.",
            ["✓ Code Review", "✓ Penetration Testing", "✓ Security Recommendations"],
            "Starting from $499",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_rejects_unknown_fields() {
        let res: Result<SiteSettingsUpdate, _> =
            serde_json::from_str(r#"{"title":"x","isAdmin":true}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let mut settings = SiteSettings::default();
        let update: SiteSettingsUpdate =
            serde_json::from_str(r#"{"heroTitle":"Hello","audio":{"autoplay":true}}"#).unwrap();
        let changed = update.apply(&mut settings);

        assert_eq!(changed, vec!["heroTitle", "audio"]);
        assert_eq!(settings.hero_title, "Hello");
        assert!(settings.audio.autoplay);
        assert_eq!(settings.audio.url, "background-music.mp3");
        assert_eq!(settings.title, SiteSettings::default().title);
    }

    #[test]
    fn test_site_data_flattens_settings() {
        let data = SiteData {
            settings: SiteSettings::default(),
            services: Vec::new(),
        };
        let v = serde_json::to_value(&data).unwrap();
        assert!(v.get("navLogo").is_some());
        assert!(v.get("services").unwrap().as_array().unwrap().is_empty());
    }
}
