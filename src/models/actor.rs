//! 会话背后的真实身份
//!
//! 每条入站事件先被解析为一个 Actor：要么是学生本人，要么是某个学生的家长。
//! 两种情况各自只携带自己需要的字段，不做松散的字符串角色标记。

/// 学生档案（登记表中的一行）
#[derive(Debug, Clone)]
pub struct StudentProfile {
    /// 登记表 ID
    pub id: String,
    /// 绑定的账号 ID（尚未进过 bot 的学生可能为空）
    pub user_id: Option<String>,
    pub full_name: String,
    pub phone: String,
    pub parent_phone: Option<String>,
}

/// 入站事件背后的身份
#[derive(Debug, Clone)]
pub enum Actor {
    /// 学生本人，user_id 一定已绑定
    Student {
        user_id: String,
        student: StudentProfile,
    },
    /// 学生家长，只能查看，不能开测试
    Parent { student: StudentProfile },
}

/// 按电话号码查找到的可接入对象
#[derive(Debug, Clone)]
pub enum PhoneMatch {
    /// 号码是学生本人的
    Student(StudentProfile),
    /// 号码是某学生的家长号码
    Parent(StudentProfile),
}

/// 学生号码绑定的结局
///
/// "号码被其他角色占用"是预期之内的正常结局，不是错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneLinkOutcome {
    Linked { user_id: String },
    PhoneUsedByOtherRole,
}

/// 申诉发送方类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealSender {
    Student,
    Parent,
}

/// 新建申诉
#[derive(Debug, Clone)]
pub struct NewAppeal {
    pub student_id: String,
    pub sender: AppealSender,
    pub sender_chat_id: i64,
    pub sender_phone: Option<String>,
    pub text: String,
}
