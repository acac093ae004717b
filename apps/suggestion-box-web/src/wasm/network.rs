use super::*;

    use async_trait::async_trait;
    use gloo_net::http::{Request, RequestBuilder, Response};
    use serde::de::DeserializeOwned;
    use serde_json::Value;
    use suggestion_box_core::persistence::{
        DEFAULT_RELAY_ACCOUNT, RelayConfigRow, StoredSuggestion,
    };
    use suggestion_box_core::submission::SuggestionRecord;
    use suggestion_box_core::{InMemorySuggestionStore, RelayError, StoreError, WebhookTransport};
    use web_sys::RequestMode;

    fn transport_error(error: gloo_net::Error) -> StoreError {
        StoreError::Transport(error.to_string())
    }

    async fn decode_response<T>(response: Response) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        if !response.ok() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, message });
        }
        response
            .json::<T>()
            .await
            .map_err(|error| StoreError::Decode(error.to_string()))
    }

    /// Record store reached with browser `fetch`.
    pub(super) struct GlooRecordStore {
        config: RecordStoreConfig,
    }

    impl GlooRecordStore {
        pub(super) fn new(config: RecordStoreConfig) -> Self {
            Self { config }
        }

        fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
            builder
                .header("apikey", &self.config.api_key)
                .header("authorization", &format!("Bearer {}", self.config.api_key))
                .header("accept", "application/json")
        }

        async fn get_json<T>(&self, url: &str) -> Result<T, StoreError>
        where
            T: DeserializeOwned,
        {
            let response = self
                .authorized(Request::get(url))
                .send()
                .await
                .map_err(transport_error)?;
            decode_response(response).await
        }

        async fn post_json<B, T>(&self, url: &str, body: &B, prefer: &str) -> Result<T, StoreError>
        where
            B: serde::Serialize + ?Sized,
            T: DeserializeOwned,
        {
            let request = self
                .authorized(Request::post(url))
                .header("prefer", prefer)
                .json(body)
                .map_err(transport_error)?;
            let response = request.send().await.map_err(transport_error)?;
            decode_response(response).await
        }
    }

    #[async_trait(?Send)]
    impl SuggestionStore for GlooRecordStore {
        async fn insert(&self, record: &SuggestionRecord) -> Result<StoredSuggestion, StoreError> {
            let rows: Vec<StoredSuggestion> = self
                .post_json(
                    &self.config.insert_url(),
                    std::slice::from_ref(record),
                    "return=representation",
                )
                .await?;
            rows.into_iter().next().ok_or(StoreError::EmptyInsert)
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSuggestion>, StoreError> {
            self.get_json(&self.config.history_url(user_id)).await
        }

        async fn relay_config(&self) -> Result<Option<RelayConfig>, StoreError> {
            let rows: Vec<RelayConfigRow> = self.get_json(&self.config.relay_config_url()).await?;
            Ok(rows.into_iter().next().map(RelayConfigRow::into_config))
        }

        async fn save_relay_config(&self, config: &RelayConfig) -> Result<(), StoreError> {
            let row = RelayConfigRow::from_config(DEFAULT_RELAY_ACCOUNT, config);
            let _: Value = self
                .post_json(
                    &self.config.relay_upsert_url(),
                    std::slice::from_ref(&row),
                    "resolution=merge-duplicates,return=representation",
                )
                .await?;
            Ok(())
        }
    }

    /// Either the configured remote store or the page-lifetime memory store.
    pub(super) enum WebStore {
        Remote(GlooRecordStore),
        Local(Rc<InMemorySuggestionStore>),
    }

    impl WebStore {
        pub(super) fn new(
            remote: Option<RecordStoreConfig>,
            offline: Rc<InMemorySuggestionStore>,
        ) -> Self {
            match remote {
                Some(config) => Self::Remote(GlooRecordStore::new(config)),
                None => Self::Local(offline),
            }
        }
    }

    #[async_trait(?Send)]
    impl SuggestionStore for WebStore {
        async fn insert(&self, record: &SuggestionRecord) -> Result<StoredSuggestion, StoreError> {
            match self {
                Self::Remote(store) => store.insert(record).await,
                Self::Local(store) => store.insert(record).await,
            }
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSuggestion>, StoreError> {
            match self {
                Self::Remote(store) => store.list_for_user(user_id).await,
                Self::Local(store) => store.list_for_user(user_id).await,
            }
        }

        async fn relay_config(&self) -> Result<Option<RelayConfig>, StoreError> {
            match self {
                Self::Remote(store) => store.relay_config().await,
                Self::Local(store) => store.relay_config().await,
            }
        }

        async fn save_relay_config(&self, config: &RelayConfig) -> Result<(), StoreError> {
            match self {
                Self::Remote(store) => store.save_relay_config(config).await,
                Self::Local(store) => store.save_relay_config(config).await,
            }
        }
    }

    /// Webhook delivery with `mode: no-cors`. The response is opaque, so a
    /// completed request counts as delivered whatever the status.
    pub(super) struct NoCorsWebhookTransport;

    #[async_trait(?Send)]
    impl WebhookTransport for NoCorsWebhookTransport {
        async fn post_json(&self, url: &url::Url, body: &Value) -> Result<(), RelayError> {
            let request = Request::post(url.as_str())
                .mode(RequestMode::NoCors)
                .header("content-type", "application/json")
                .json(body)
                .map_err(|error| RelayError::Transport(error.to_string()))?;
            request
                .send()
                .await
                .map_err(|error| RelayError::Transport(error.to_string()))?;
            Ok(())
        }
    }
