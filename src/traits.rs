use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::config::ClosurePathConfig;
use crate::types::{Depth, NodeKey, PathRow};

/// Trait implemented by SeaORM `Model` types backing a closure table.
///
/// Each model is one `(ancestor, descendant, depth)` row with its own primary key.
/// Implementations are normally provided by the `#[derive(ClosurePathModel)]` macro.
pub trait ClosurePathModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type NodeId: NodeKey;
    type RowId: NodeKey;

    fn closure_path_config() -> &'static ClosurePathConfig;

    fn row_id(&self) -> Self::RowId;
    fn ancestor(&self) -> Self::NodeId;
    fn descendant(&self) -> Self::NodeId;
    fn depth(&self) -> Depth;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn ancestor_column() -> <Self::Entity as EntityTrait>::Column;
    fn descendant_column() -> <Self::Entity as EntityTrait>::Column;
    fn depth_column() -> <Self::Entity as EntityTrait>::Column;

    fn node_to_value(id: &Self::NodeId) -> Value;
    fn row_id_to_value(id: &Self::RowId) -> Value;

    /// Active model for a row that has not been persisted yet.
    fn build_row(ancestor: Self::NodeId, descendant: Self::NodeId, depth: Depth)
        -> Self::ActiveModel;

    fn to_path_row(&self) -> PathRow<Self::NodeId, Self::RowId> {
        PathRow::new(self.ancestor(), self.descendant(), self.depth()).with_id(self.row_id())
    }
}
