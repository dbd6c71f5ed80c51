//! Customer product snapshot reader
//!
//! Finds, for one candidate product, the customer's current main product,
//! the instance of the same product, and any product scheduled to start at
//! the next cycle. Everything is scoped by product group and by entity.

use tollgate_shared::{CustomerProduct, Product};

/// Products relevant to one candidate, borrowed from the customer's full list
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductSnapshot<'a> {
    /// Live non-add-on product in the candidate's group
    pub current_main: Option<&'a CustomerProduct>,
    /// Instance of the candidate's product id (live preferred over scheduled)
    pub current_same: Option<&'a CustomerProduct>,
    /// Product queued for a future cycle in the candidate's group
    pub current_scheduled: Option<&'a CustomerProduct>,
}

impl<'a> ProductSnapshot<'a> {
    /// Locate the snapshot for `candidate` among `products`
    pub fn locate(
        products: &'a [CustomerProduct],
        candidate: &Product,
        entity_id: Option<&str>,
    ) -> Self {
        let in_scope = |cp: &&'a CustomerProduct| {
            (cp.is_live() || cp.is_scheduled()) && cp.entity_id.as_deref() == entity_id
        };

        let same_live = latest(
            products
                .iter()
                .filter(in_scope)
                .filter(|cp| cp.is_live() && cp.product.id == candidate.id),
        );
        let current_same = same_live.or_else(|| {
            latest(
                products
                    .iter()
                    .filter(in_scope)
                    .filter(|cp| cp.is_scheduled() && cp.product.id == candidate.id),
            )
        });

        let current_main = latest(products.iter().filter(in_scope).filter(|cp| {
            cp.is_live() && !cp.product.is_add_on && cp.product.group == candidate.group
        }));

        let current_scheduled = latest(
            products
                .iter()
                .filter(in_scope)
                .filter(|cp| cp.is_scheduled() && cp.product.group == candidate.group),
        );

        Self {
            current_main,
            current_same,
            current_scheduled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_main.is_none()
            && self.current_same.is_none()
            && self.current_scheduled.is_none()
    }
}

/// Most recently created instance wins
fn latest<'a>(iter: impl Iterator<Item = &'a CustomerProduct>) -> Option<&'a CustomerProduct> {
    iter.max_by_key(|cp| cp.created_at)
}
