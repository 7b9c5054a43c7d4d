use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::info;

use super::sqlite::SqliteStore;
use crate::models::contact::{Contact, ContactStatus, NewContact};
use crate::models::site::{
    seed_services, NewService, Service, ServiceUpdate, SiteData, SiteSettings, SiteSettingsUpdate,
};

const SETTINGS_KEY: &str = "site_settings";

/// Site texts, services and contact submissions.
///
/// A fresh database is seeded with [`SiteSettings::default`] and the four
/// default services. Every mutation is a single SQLite transaction so
/// concurrent admin edits cannot interleave a read-modify-write.
pub struct ContentStore {
    sqlite: Arc<SqliteStore>,
}

impl ContentStore {
    pub fn new(sqlite: Arc<SqliteStore>) -> rusqlite::Result<Self> {
        let store = Self { sqlite };
        store.seed_if_empty()?;
        Ok(store)
    }

    fn seed_if_empty(&self) -> rusqlite::Result<()> {
        if self.sqlite.get_document(SETTINGS_KEY)?.is_some() {
            return Ok(());
        }
        self.sqlite
            .put_document(SETTINGS_KEY, &encode(&SiteSettings::default())?)?;
        if self.sqlite.service_count()? == 0 {
            self.sqlite.replace_services(&seed_services())?;
        }
        info!("Content store seeded with default site data");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Site data
    // -----------------------------------------------------------------------

    pub fn settings(&self) -> rusqlite::Result<SiteSettings> {
        match self.sqlite.get_document(SETTINGS_KEY)? {
            Some(raw) => decode(&raw),
            None => Ok(SiteSettings::default()),
        }
    }

    pub fn site_data(&self) -> rusqlite::Result<SiteData> {
        Ok(SiteData {
            settings: self.settings()?,
            services: self.sqlite.list_services()?,
        })
    }

    /// Merge a partial update. Returns the new settings and the changed
    /// field names.
    pub fn update_settings(
        &self,
        update: SiteSettingsUpdate,
    ) -> rusqlite::Result<(SiteSettings, Vec<&'static str>)> {
        self.merge_settings(update, None)
    }

    /// Merge backed-up settings and, when given, replace the whole service
    /// list. Both land in one transaction or neither does.
    pub fn restore(
        &self,
        settings: SiteSettingsUpdate,
        services: Option<Vec<NewService>>,
    ) -> rusqlite::Result<SiteData> {
        self.merge_settings(settings, services.as_deref())?;
        self.site_data()
    }

    fn merge_settings(
        &self,
        update: SiteSettingsUpdate,
        services: Option<&[NewService]>,
    ) -> rusqlite::Result<(SiteSettings, Vec<&'static str>)> {
        let mut changed = Vec::new();
        let raw = self.sqlite.update_document_with_services(
            SETTINGS_KEY,
            |current| {
                let mut settings = match current {
                    Some(raw) => decode(&raw)?,
                    None => SiteSettings::default(),
                };
                changed = update.apply(&mut settings);
                encode(&settings)
            },
            services,
        )?;
        Ok((decode(&raw)?, changed))
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    pub fn services(&self) -> rusqlite::Result<Vec<Service>> {
        self.sqlite.list_services()
    }

    pub fn service(&self, id: i64) -> rusqlite::Result<Option<Service>> {
        self.sqlite.get_service(id)
    }

    /// Ids are always assigned by the store on add.
    pub fn add_service(&self, mut service: NewService) -> rusqlite::Result<Service> {
        service.id = None;
        self.sqlite.insert_service(&service)
    }

    pub fn update_service(&self, id: i64, update: ServiceUpdate) -> rusqlite::Result<Option<Service>> {
        self.sqlite.update_service(id, update)
    }

    pub fn delete_service(&self, id: i64) -> rusqlite::Result<bool> {
        self.sqlite.delete_service(id)
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    pub fn add_contact(&self, input: NewContact) -> rusqlite::Result<Contact> {
        let now = Utc::now();
        let suffix: u32 = rand::rng().random();
        let contact = Contact {
            id: format!("c-{}-{:08x}", now.timestamp_millis(), suffix),
            name: input.name,
            email: input.email,
            service: input.service,
            message: input.message,
            timestamp: now,
            status: ContactStatus::New,
            ip: input.ip,
            user_agent: input.user_agent,
        };
        self.sqlite.insert_contact(&contact)?;
        Ok(contact)
    }

    /// Newest first.
    pub fn contacts(&self) -> rusqlite::Result<Vec<Contact>> {
        self.sqlite.list_contacts()
    }

    pub fn set_contact_status(
        &self,
        id: &str,
        status: ContactStatus,
    ) -> rusqlite::Result<Option<Contact>> {
        self.sqlite.update_contact_status(id, status)
    }
}

fn encode(settings: &SiteSettings) -> rusqlite::Result<String> {
    serde_json::to_string(settings).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode(raw: &str) -> rusqlite::Result<SiteSettings> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContentStore {
        ContentStore::new(Arc::new(SqliteStore::in_memory().unwrap())).unwrap()
    }

    fn contact(name: &str) -> NewContact {
        NewContact {
            name: name.to_string(),
            email: format!("{}@example.com", name),
            service: None,
            message: "hello".to_string(),
            ip: Some("10.0.0.1".to_string()),
            user_agent: None,
        }
    }

    #[test]
    fn test_seeds_defaults() {
        let s = store();
        let data = s.site_data().unwrap();
        assert_eq!(data.settings, SiteSettings::default());
        assert_eq!(data.services.len(), 4);
        assert_eq!(data.services[0].id, 1);
    }

    #[test]
    fn test_seed_runs_once() {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let first = ContentStore::new(sqlite.clone()).unwrap();
        for svc in first.services().unwrap() {
            first.delete_service(svc.id).unwrap();
        }
        let second = ContentStore::new(sqlite).unwrap();
        assert!(second.services().unwrap().is_empty());
    }

    #[test]
    fn test_update_settings_reports_changes() {
        let s = store();
        let update: SiteSettingsUpdate = serde_json::from_str(r#"{"theme":"light"}"#).unwrap();
        let (settings, changed) = s.update_settings(update).unwrap();
        assert_eq!(changed, vec!["theme"]);
        assert_eq!(settings.theme, "light");
        assert_eq!(s.settings().unwrap().theme, "light");
    }

    #[test]
    fn test_add_service_ignores_client_id() {
        let s = store();
        let svc: NewService = serde_json::from_str(r#"{"id":1,"name":"Extra"}"#).unwrap();
        let created = s.add_service(svc).unwrap();
        assert_ne!(created.id, 1);
        assert_eq!(created.kind, "contact");
        assert_eq!(s.services().unwrap().len(), 5);
    }

    #[test]
    fn test_contacts_newest_first_and_status() {
        let s = store();
        let a = s.add_contact(contact("alice")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = s.add_contact(contact("bob")).unwrap();
        assert!(a.id.starts_with("c-"));

        let list = s.contacts().unwrap();
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);

        let updated = s.set_contact_status(&a.id, ContactStatus::Replied).unwrap().unwrap();
        assert_eq!(updated.status, ContactStatus::Replied);
        assert!(s.set_contact_status("missing", ContactStatus::Read).unwrap().is_none());
    }

    #[test]
    fn test_restore_replaces_services() {
        let s = store();
        let update: SiteSettingsUpdate = serde_json::from_str(r#"{"title":"Restored"}"#).unwrap();
        let svc: NewService = serde_json::from_str(r#"{"id":42,"name":"Only"}"#).unwrap();
        let data = s.restore(update, Some(vec![svc])).unwrap();
        assert_eq!(data.settings.title, "Restored");
        assert_eq!(data.services.len(), 1);
        assert_eq!(data.services[0].id, 42);
    }

    #[test]
    fn test_failed_restore_leaves_store_untouched() {
        let s = store();
        let before = s.site_data().unwrap();
        let update: SiteSettingsUpdate =
            serde_json::from_str(r#"{"title":"Half restored"}"#).unwrap();
        let dup: Vec<NewService> =
            serde_json::from_str(r#"[{"id":7,"name":"A"},{"id":7,"name":"B"}]"#).unwrap();

        assert!(s.restore(update, Some(dup)).is_err());
        assert_eq!(s.site_data().unwrap(), before);
    }
}
