use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{Commission, Order, OrderFilters, OrderStatus};
use crate::notify::NotificationKind;
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_all_orders(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Order>>> {
    let (limit, offset) = pagination.resolve();
    let conn = state.db.get()?;
    let (items, total) = queries::list_orders(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated {
        items,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub commissions: Vec<Commission>,
}

/// One order with the commissions it produced.
pub async fn get_order_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetail>> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_id(&conn, &id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    let commissions = queries::list_commissions_for_order(&conn, &order.id)?;
    Ok(Json(OrderDetail { order, commissions }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// Move an order through fulfillment.
///
/// Status changes never touch the ledger: commissions were computed when the
/// payment settled and a later cancellation is handled as a manual refund
/// outside this system. The buyer gets a status notification.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>> {
    let status = OrderStatus::from_str(&request.status)
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_ORDER_STATUS.into()))?;

    let conn = state.db.get()?;
    let order =
        queries::update_order_status(&conn, &id, status)?.or_not_found(msg::ORDER_NOT_FOUND)?;

    if let Some(buyer) = queries::get_user_by_id(&conn, &order.user_id)? {
        state.notifications.spawn(
            &buyer.email,
            buyer.locale.as_deref(),
            NotificationKind::OrderStatusChanged {
                order_id: order.id.clone(),
                status: status.to_string(),
            },
        );
    }

    Ok(Json(order))
}
