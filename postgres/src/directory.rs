//! Read-only provider and service directories over the catalog tables.

use crate::error::{classify, corrupt_row};
use crate::rows::{ProviderRow, ServiceRow};
use chairbook_core::directory::{
    BoxFuture, ProviderDirectory, ProviderRecord, ServiceDirectory, ServiceRecord,
};
use chairbook_core::error::Result;
use chairbook_core::types::Currency;
use chairbook_core::{ProviderId, ServiceId};
use sqlx::PgPool;

/// Catalog lookups against the `barbers` and `barber_services` tables.
#[derive(Clone, Debug)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    /// Create a directory over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TryFrom<ServiceRow> for ServiceRecord {
    type Error = chairbook_core::BookingError;

    fn try_from(row: ServiceRow) -> Result<Self> {
        let currency = Currency::new(row.currency.trim())
            .map_err(|e| corrupt_row("barber_services", row.id, e))?;
        let duration_minutes = u32::try_from(row.duration_minutes)
            .map_err(|e| corrupt_row("barber_services", row.id, e))?;

        Ok(Self {
            id: ServiceId::new(row.id),
            provider_id: ProviderId::new(row.barber_id),
            name: row.name,
            price: row.price,
            currency,
            duration_minutes,
            is_active: row.is_active,
        })
    }
}

impl ProviderDirectory for PostgresDirectory {
    fn provider(&self, id: ProviderId) -> BoxFuture<'_, Result<Option<ProviderRecord>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, ProviderRow>(
                "SELECT id, display_name, is_active FROM barbers WHERE id = $1",
            )
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "load provider", None))?;

            Ok(row.map(|row| ProviderRecord {
                id: ProviderId::new(row.id),
                display_name: row.display_name,
                is_active: row.is_active,
            }))
        })
    }
}

impl ServiceDirectory for PostgresDirectory {
    fn service(
        &self,
        provider_id: ProviderId,
        service_id: ServiceId,
    ) -> BoxFuture<'_, Result<Option<ServiceRecord>>> {
        Box::pin(async move {
            sqlx::query_as::<_, ServiceRow>(
                r"
                SELECT id, barber_id, name, price, currency, duration_minutes, is_active
                FROM barber_services
                WHERE id = $1 AND barber_id = $2
                ",
            )
            .bind(service_id.get())
            .bind(provider_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "load service", None))?
            .map(ServiceRecord::try_from)
            .transpose()
        })
    }
}
