use mockall::mock;

use xml_assert::document::XmlDocument;
use xml_assert::schema::{SchemaRepository, SchemaSource};

mock! {
    /// Repository whose capability and schemas are scripted per test
    pub Repository {}

    impl SchemaRepository for Repository {
        fn name(&self) -> String;
        fn schemas(&self) -> Vec<SchemaSource>;
        fn can_validate(&self, document: &XmlDocument) -> bool;
    }
}

impl MockRepository {
    /// A repository that can validate anything and serves `schemas`.
    pub fn serving(name: &str, schemas: Vec<SchemaSource>) -> Self {
        let mut repository = MockRepository::new();
        let name = name.to_string();
        repository.expect_name().returning(move || name.clone());
        repository.expect_can_validate().return_const(true);
        repository.expect_schemas().returning(move || schemas.clone());
        repository
    }
}
