use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_orders_tables::Migration),
            Box::new(m20240301_000003_create_preparation_logs_table::Migration),
            Box::new(m20240301_000004_create_user_restrictions_table::Migration),
        ]
    }
}

mod m20240301_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Departments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Departments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Departments::Name).string().not_null())
                        .col(
                            ColumnDef::new(Departments::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Departments::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Departments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Warehouses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Warehouses::Name).string().not_null())
                        .col(
                            ColumnDef::new(Warehouses::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Warehouses::WarehouseType).string().not_null())
                        .col(
                            ColumnDef::new(Warehouses::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DepartmentWarehouses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DepartmentWarehouses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepartmentWarehouses::DepartmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepartmentWarehouses::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepartmentWarehouses::Priority)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(DepartmentWarehouses::IsPrimary)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_department_warehouses_department_id")
                                .from(
                                    DepartmentWarehouses::Table,
                                    DepartmentWarehouses::DepartmentId,
                                )
                                .to(Departments::Table, Departments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_department_warehouses_warehouse_id")
                                .from(
                                    DepartmentWarehouses::Table,
                                    DepartmentWarehouses::WarehouseId,
                                )
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_department_warehouses_pair")
                        .table(DepartmentWarehouses::Table)
                        .col(DepartmentWarehouses::DepartmentId)
                        .col(DepartmentWarehouses::WarehouseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DepartmentSupervisors::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DepartmentSupervisors::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepartmentSupervisors::UserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepartmentSupervisors::DepartmentId)
                                .uuid()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_department_supervisors_department_id")
                                .from(
                                    DepartmentSupervisors::Table,
                                    DepartmentSupervisors::DepartmentId,
                                )
                                .to(Departments::Table, Departments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_department_supervisors_user_id")
                        .table(DepartmentSupervisors::Table)
                        .col(DepartmentSupervisors::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Items::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Items::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Items::Name).string().not_null())
                        .col(ColumnDef::new(Items::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(Items::Category).string().null())
                        .col(ColumnDef::new(Items::Unit).string().null())
                        .col(
                            ColumnDef::new(Items::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Items::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_items_warehouse_id")
                                .from(Items::Table, Items::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_items_name")
                        .table(Items::Table)
                        .col(Items::Name)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Items::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DepartmentSupervisors::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DepartmentWarehouses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Departments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Departments {
        Table,
        Id,
        Name,
        Code,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Warehouses {
        Table,
        Id,
        Name,
        Code,
        WarehouseType,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum DepartmentWarehouses {
        Table,
        Id,
        DepartmentId,
        WarehouseId,
        Priority,
        IsPrimary,
    }

    #[derive(DeriveIden)]
    enum DepartmentSupervisors {
        Table,
        Id,
        UserId,
        DepartmentId,
    }

    #[derive(DeriveIden)]
    enum Items {
        Table,
        Id,
        Name,
        WarehouseId,
        Category,
        Unit,
        IsActive,
        CreatedAt,
    }
}

mod m20240301_000002_create_orders_tables {

    use super::m20240301_000001_create_catalog_tables::{Departments, Warehouses};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::DepartmentId).uuid().not_null())
                        .col(ColumnDef::new(Orders::WarehouseId).uuid().null())
                        .col(ColumnDef::new(Orders::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_department_id")
                                .from(Orders::Table, Orders::DepartmentId)
                                .to(Departments::Table, Departments::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_warehouse_id")
                                .from(Orders::Table, Orders::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Collisions on this index drive order-number retries.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            for (name, col) in [
                ("idx_orders_department_id", Orders::DepartmentId),
                ("idx_orders_warehouse_id", Orders::WarehouseId),
                ("idx_orders_status", Orders::Status),
                ("idx_orders_created_by", Orders::CreatedBy),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(Orders::Table)
                            .col(col)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ItemName).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::Unit).string().not_null())
                        .col(ColumnDef::new(OrderItems::Notes).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderHistory::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderHistory::Status).string_len(16).not_null())
                        .col(ColumnDef::new(OrderHistory::ChangedBy).uuid().not_null())
                        .col(ColumnDef::new(OrderHistory::Notes).text().null())
                        .col(
                            ColumnDef::new(OrderHistory::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_history_order_id")
                                .from(OrderHistory::Table, OrderHistory::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_history_order_id")
                        .table(OrderHistory::Table)
                        .col(OrderHistory::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        DepartmentId,
        WarehouseId,
        Status,
        Notes,
        DeliveredAt,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ItemName,
        Quantity,
        Unit,
        Notes,
    }

    #[derive(DeriveIden)]
    enum OrderHistory {
        Table,
        Id,
        OrderId,
        Status,
        ChangedBy,
        Notes,
        Timestamp,
    }
}

mod m20240301_000003_create_preparation_logs_table {

    use super::m20240301_000001_create_catalog_tables::Warehouses;
    use super::m20240301_000002_create_orders_tables::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_preparation_logs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderPreparationLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderPreparationLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderPreparationLogs::OrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderPreparationLogs::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderPreparationLogs::PreparedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderPreparationLogs::ItemName).string().null())
                        .col(
                            ColumnDef::new(OrderPreparationLogs::Action)
                                .string_len(24)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderPreparationLogs::RequestedQty)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OrderPreparationLogs::AvailableQty)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(OrderPreparationLogs::Notes).text().null())
                        .col(
                            ColumnDef::new(OrderPreparationLogs::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_preparation_logs_order_id")
                                .from(OrderPreparationLogs::Table, OrderPreparationLogs::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_preparation_logs_warehouse_id")
                                .from(
                                    OrderPreparationLogs::Table,
                                    OrderPreparationLogs::WarehouseId,
                                )
                                .to(Warehouses::Table, Warehouses::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_preparation_logs_order_item")
                        .table(OrderPreparationLogs::Table)
                        .col(OrderPreparationLogs::OrderId)
                        .col(OrderPreparationLogs::ItemName)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_preparation_logs_warehouse_id")
                        .table(OrderPreparationLogs::Table)
                        .col(OrderPreparationLogs::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_preparation_logs_prepared_by")
                        .table(OrderPreparationLogs::Table)
                        .col(OrderPreparationLogs::PreparedBy)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderPreparationLogs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderPreparationLogs {
        Table,
        Id,
        OrderId,
        WarehouseId,
        PreparedBy,
        ItemName,
        Action,
        RequestedQty,
        AvailableQty,
        Notes,
        Timestamp,
    }
}

mod m20240301_000004_create_user_restrictions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_user_restrictions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UserRestrictions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserRestrictions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::UserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::OrderRateLimit)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::OrderRatePeriodHours)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CanApproveOrders)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CanRejectOrders)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CanViewAllOrders)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CanReceiveReadyOrders)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CanViewPendingOrders)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::MaxDeliveriesPerDay)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UserRestrictions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserRestrictions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum UserRestrictions {
        Table,
        Id,
        UserId,
        OrderRateLimit,
        OrderRatePeriodHours,
        CanApproveOrders,
        CanRejectOrders,
        CanViewAllOrders,
        CanReceiveReadyOrders,
        CanViewPendingOrders,
        MaxDeliveriesPerDay,
        CreatedAt,
        UpdatedAt,
    }
}

/// Connects to `db_url` and applies every pending migration.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
