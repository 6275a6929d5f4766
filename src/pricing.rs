use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use ulid::Ulid;

/// External price list consulted when a line item arrives without a price.
/// `None` means no entry applies and the service's base price is used.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn price_for(&self, service_id: Ulid, service_point_id: Ulid) -> Option<Decimal>;
}

/// Always defers to base prices.
pub struct NoPriceList;

#[async_trait]
impl PriceLookup for NoPriceList {
    async fn price_for(&self, _service_id: Ulid, _service_point_id: Ulid) -> Option<Decimal> {
        None
    }
}

/// In-memory price list. A point-specific entry beats a list-wide one.
#[derive(Default)]
pub struct StaticPriceList {
    per_point: DashMap<(Ulid, Ulid), Decimal>,
    list_wide: DashMap<Ulid, Decimal>,
}

impl StaticPriceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, service_id: Ulid, price: Decimal) {
        self.list_wide.insert(service_id, price);
    }

    pub fn set_point_price(&self, service_id: Ulid, service_point_id: Ulid, price: Decimal) {
        self.per_point.insert((service_id, service_point_id), price);
    }
}

#[async_trait]
impl PriceLookup for StaticPriceList {
    async fn price_for(&self, service_id: Ulid, service_point_id: Ulid) -> Option<Decimal> {
        self.per_point
            .get(&(service_id, service_point_id))
            .map(|p| *p)
            .or_else(|| self.list_wide.get(&service_id).map(|p| *p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn point_price_wins() {
        let list = StaticPriceList::new();
        let service = Ulid::new();
        let here = Ulid::new();
        let there = Ulid::new();
        list.set_price(service, Decimal::new(400, 0));
        list.set_point_price(service, here, Decimal::new(350, 0));

        assert_eq!(list.price_for(service, here).await, Some(Decimal::new(350, 0)));
        assert_eq!(list.price_for(service, there).await, Some(Decimal::new(400, 0)));
        assert_eq!(list.price_for(Ulid::new(), here).await, None);
        assert_eq!(NoPriceList.price_for(service, here).await, None);
    }
}
