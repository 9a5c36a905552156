use uuid::Uuid;

/// Source of fresh primary keys for entities created without one.
pub trait IdGenerator<K>: Send + Sync {
    fn next_id(&self) -> K;
}

/// Time-ordered UUID v7 ids rendered as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator<String> for UuidIdGenerator {
    fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

impl IdGenerator<Uuid> for UuidIdGenerator {
    fn next_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_text_ids() {
        let ids: Vec<String> = (0..100)
            .map(|_| IdGenerator::<String>::next_id(&UuidIdGenerator))
            .collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
        assert!(ids.iter().all(|id| id.parse::<Uuid>().is_ok()));
    }

    #[test]
    fn uuid_ids_are_v7() {
        let id = IdGenerator::<Uuid>::next_id(&UuidIdGenerator);
        assert_eq!(id.get_version_num(), 7);
    }
}
